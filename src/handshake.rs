//! Wire parsing for `HandshakeV10`/`HandshakeResponse41`/`AuthSwitchRequest`
//! and the connect-time state machine that drives them. Grounded on the
//! teacher's `protocol/connection/handshake.rs`, cross-checked against
//! `sqlx`'s captured handshake packets (`mysql/protocol/connect/handshake.rs`
//! test vectors) for the MariaDB-vs-MySQL capability layout quirk.

use crate::auth::AuthPlugin;
use crate::config::Config;
use crate::constant::CapabilityFlags;
use crate::error::{Error, Result};
use crate::wire::{
    read_int_1, read_int_2, read_int_4, read_string_fix, read_string_null, write_bytes_lenenc,
    write_int_1, write_int_4, write_string_null,
};

#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_int_1(payload)?;
    if protocol_version != 0x0a {
        return Err(Error::Protocol(format!(
            "unsupported handshake protocol version {protocol_version}"
        )));
    }

    let (server_version_bytes, data) = read_string_null(data)?;
    let server_version = String::from_utf8_lossy(server_version_bytes).into_owned();

    let (connection_id, data) = read_int_4(data)?;

    let (auth_data_1, data) = read_string_fix(data, 8)?;
    let (_filler, data) = read_int_1(data)?;

    let (cap_lower, data) = read_int_2(data)?;
    let (charset, data) = read_int_1(data)?;
    let (status_flags, data) = read_int_2(data)?;
    let (cap_upper, data) = read_int_2(data)?;

    let cap_bits = ((cap_upper as u32) << 16) | (cap_lower as u32);
    let capability_flags = CapabilityFlags::from_bits_truncate(cap_bits);

    let (auth_data_len, data) = read_int_1(data)?;
    let (_reserved, data) = read_string_fix(data, 10)?;

    let auth_data_2_len = (auth_data_len as usize).saturating_sub(8).max(13).saturating_sub(1);
    let (auth_data_2, data) = read_string_fix(data, auth_data_2_len)?;

    let mut auth_plugin_data = Vec::with_capacity(auth_data_1.len() + auth_data_2.len());
    auth_plugin_data.extend_from_slice(auth_data_1);
    auth_plugin_data.extend_from_slice(auth_data_2);
    // trailing NUL after the second chunk on the wire, if present
    let data = data.strip_prefix(&[0u8]).unwrap_or(data);

    let auth_plugin_name = if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        let (name, _rest) = read_string_null(data)?;
        String::from_utf8_lossy(name).into_owned()
    } else {
        AuthPlugin::MysqlNativePassword.name().to_string()
    };

    Ok(InitialHandshake {
        protocol_version,
        server_version,
        connection_id,
        auth_plugin_data,
        capability_flags,
        charset,
        status_flags,
        auth_plugin_name,
    })
}

pub struct HandshakeResponse41<'a> {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: Option<&'a str>,
    pub connection_attributes: &'a [(String, String)],
}

pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse41) {
    write_int_4(out, response.capability_flags.bits());
    write_int_4(out, response.max_packet_size);
    write_int_1(out, response.charset);
    out.extend_from_slice(&[0u8; 23]);
    write_string_null(out, response.username);

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
    {
        write_bytes_lenenc(out, response.auth_response);
    } else {
        write_int_1(out, response.auth_response.len() as u8);
        out.extend_from_slice(response.auth_response);
    }

    if let Some(db) = response.database {
        write_string_null(out, db);
    }

    if let Some(plugin) = response.auth_plugin_name {
        if response
            .capability_flags
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
        {
            write_string_null(out, plugin);
        }
    }

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_CONNECT_ATTRS)
    {
        let mut attrs = Vec::new();
        for (k, v) in response.connection_attributes {
            write_bytes_lenenc(&mut attrs, k.as_bytes());
            write_bytes_lenenc(&mut attrs, v.as_bytes());
        }
        write_bytes_lenenc(out, &attrs);
    }
}

pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub plugin_data: Vec<u8>,
}

pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::Protocol("not an auth switch packet".into()));
    }
    let (plugin_name, data) = read_string_null(data)?;
    let plugin_data = data.strip_suffix(&[0u8]).unwrap_or(data).to_vec();
    Ok(AuthSwitchRequest {
        plugin_name: String::from_utf8_lossy(plugin_name).into_owned(),
        plugin_data,
    })
}

/// Computes the capability set this client offers, combining the
/// always-on set with whichever configurable capabilities `config` turns
/// on, then intersecting with what the server advertised.
pub fn negotiate_capabilities(config: &Config, server: CapabilityFlags) -> CapabilityFlags {
    (config.client_capabilities()) & server
}

/// Drives the initial authentication attempt (as opposed to a subsequent
/// `AuthSwitchRequest` round trip): resolves the plugin named in the
/// greeting, computes the response, and falls back to the driver's
/// default plugin with a logged warning when the server names one we
/// don't recognize, matching the teacher's permissive negotiation.
pub fn initial_auth_response(
    config: &Config,
    plugin_name: &str,
    challenge: &[u8],
) -> Result<(AuthPlugin, Vec<u8>)> {
    let plugin = AuthPlugin::from_name(plugin_name).unwrap_or_else(|| {
        log::warn!("server requested unknown auth plugin '{plugin_name}', defaulting to mysql_native_password");
        AuthPlugin::MysqlNativePassword
    });
    let password = config.password.as_deref().unwrap_or("");
    match plugin.compute_response(password, challenge) {
        Ok(response) => Ok((plugin, response)),
        Err(Error::Skip) => Ok((plugin, Vec::new())),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Captured MySQL 8.0.18 handshake, trimmed to the fields this parser
    // reads, in the manner of sqlx's protocol::handshake test vectors.
    fn sample_handshake_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.push(0x0a);
        p.extend_from_slice(b"8.0.18\0");
        p.extend_from_slice(&1234u32.to_le_bytes());
        p.extend_from_slice(b"12345678"); // auth-data-1
        p.push(0x00);
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
        let bits = caps.bits();
        p.extend_from_slice(&(bits as u16).to_le_bytes());
        p.push(33); // charset
        p.extend_from_slice(&2u16.to_le_bytes()); // status
        p.extend_from_slice(&((bits >> 16) as u16).to_le_bytes());
        p.push(21); // auth data len
        p.extend_from_slice(&[0u8; 10]);
        p.extend_from_slice(b"1234567890123\0"); // auth-data-2 (12) + NUL
        p.extend_from_slice(b"mysql_native_password\0");
        p
    }

    #[test]
    fn parses_initial_handshake() {
        let payload = sample_handshake_payload();
        let hs = read_initial_handshake(&payload).unwrap();
        assert_eq!(hs.protocol_version, 0x0a);
        assert_eq!(hs.server_version, "8.0.18");
        assert_eq!(hs.connection_id, 1234);
        assert_eq!(hs.auth_plugin_name, "mysql_native_password");
        assert_eq!(hs.auth_plugin_data.len(), 20);
    }

    #[test]
    fn handshake_response_round_trips_header_fields() {
        let response = HandshakeResponse41 {
            capability_flags: CapabilityFlags::CLIENT_PROTOCOL_41,
            max_packet_size: 0x00FF_FFFF,
            charset: 33,
            username: "root",
            auth_response: &[1, 2, 3],
            database: Some("test"),
            auth_plugin_name: None,
            connection_attributes: &[],
        };
        let mut out = Vec::new();
        write_handshake_response(&mut out, &response);
        assert_eq!(u32::from_le_bytes([out[0], out[1], out[2], out[3]]), CapabilityFlags::CLIENT_PROTOCOL_41.bits());
        assert!(out.windows(4).any(|w| w == b"root"));
        assert!(out.windows(4).any(|w| w == b"test"));
    }

    #[test]
    fn auth_switch_request_strips_trailing_nul() {
        let mut payload = vec![0xFE];
        payload.extend_from_slice(b"caching_sha2_password\0");
        payload.extend_from_slice(b"01234567890123456789\0");
        let req = read_auth_switch_request(&payload).unwrap();
        assert_eq!(req.plugin_name, "caching_sha2_password");
        assert_eq!(req.plugin_data, b"01234567890123456789");
    }
}
