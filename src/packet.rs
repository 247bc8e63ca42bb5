//! Packet framer: the 4-byte length+sequence header, 16 MiB − 1
//! fragmentation, and the logical-packet reassembly that sits directly on
//! top of `Buffer`. Grounded on the teacher's `protocol/packet.rs`
//! (`PacketHeader`), rewritten against a synchronous `Buffer` instead of
//! `tokio_util::codec::Decoder`.

use crate::buffer::{Buffer, Deadline};
use crate::constant::MAX_PACKET_PAYLOAD;
use crate::error::{Error, Result};

/// Tracks the sequence number for one command round-trip. Reset to 0 at
/// the start of every new command; the server and client must alternate
/// in lockstep or the connection is considered corrupt.
#[derive(Debug, Default)]
pub struct SequencePacer {
    next: u8,
}

impl SequencePacer {
    pub fn reset(&mut self) {
        self.next = 0;
    }

    fn expect_and_advance(&mut self, got: u8) -> Result<()> {
        if got != self.next {
            return Err(Error::Protocol(format!(
                "sequence mismatch: expected {}, got {got}",
                self.next
            )));
        }
        self.next = self.next.wrapping_add(1);
        Ok(())
    }

    fn take_and_advance(&mut self) -> u8 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// Reads one logical packet (reassembling `MAX_PACKET_PAYLOAD`-sized
/// fragments terminated by a shorter, possibly zero-length, final
/// fragment) from `buf`, validating the sequence number against `pacer`.
pub fn read_packet<S: Deadline>(buf: &mut Buffer<S>, pacer: &mut SequencePacer) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    loop {
        let header = buf.read_next(4)?;
        let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let sequence_id = header[3];
        pacer.expect_and_advance(sequence_id)?;

        let chunk = buf.read_next(length)?;
        payload.extend_from_slice(chunk);

        if length < MAX_PACKET_PAYLOAD {
            return Ok(payload);
        }
        // Exactly MAX_PACKET_PAYLOAD bytes: the payload continues in a
        // following packet, terminated by one shorter than the limit
        // (including possibly empty).
    }
}

/// Writes `payload` straight through `buf`'s write rental, splitting into
/// `MAX_PACKET_PAYLOAD`-sized fragments and appending a zero-length
/// terminator when the payload is an exact multiple of the limit
/// (including the empty payload case, which still needs one header-only
/// packet). Reuses `buf`'s cached store rather than allocating a fresh
/// `Vec` per call.
pub fn write_packet<S: Deadline + std::io::Write>(
    buf: &mut Buffer<S>,
    pacer: &mut SequencePacer,
    payload: &[u8],
) -> Result<()> {
    let num_fragments = payload.len() / MAX_PACKET_PAYLOAD + 1;
    let total_len = payload.len() + 4 * num_fragments;
    let sequence_ids: Vec<u8> = (0..num_fragments).map(|_| pacer.take_and_advance()).collect();

    buf.write_through(total_len, |out| {
        let mut pos = 0;
        let mut offset = 0;
        for &sequence_id in &sequence_ids {
            let remaining = payload.len() - offset;
            let chunk_len = remaining.min(MAX_PACKET_PAYLOAD);

            let len_bytes = (chunk_len as u32).to_le_bytes();
            out[pos..pos + 3].copy_from_slice(&len_bytes[..3]);
            out[pos + 3] = sequence_id;
            out[pos + 4..pos + 4 + chunk_len].copy_from_slice(&payload[offset..offset + chunk_len]);

            pos += 4 + chunk_len;
            offset += chunk_len;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use std::io::{Cursor, Read};
    use std::time::Instant;

    struct MockStream(Cursor<Vec<u8>>);

    impl Read for MockStream {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(out)
        }
    }

    impl std::io::Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.get_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Deadline for MockStream {
        fn set_read_deadline(&mut self, _deadline: Option<Instant>) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn mock(data: Vec<u8>) -> Buffer<MockStream> {
        Buffer::new(MockStream(Cursor::new(data)))
    }

    #[test]
    fn reads_a_single_short_packet() {
        let mut wire = vec![5, 0, 0, 0];
        wire.extend_from_slice(b"hello");
        let mut buf = mock(wire);
        let mut pacer = SequencePacer::default();
        let payload = read_packet(&mut buf, &mut pacer).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn rejects_out_of_order_sequence_number() {
        let mut wire = vec![3, 0, 0, 7];
        wire.extend_from_slice(b"abc");
        let mut buf = mock(wire);
        let mut pacer = SequencePacer::default();
        let err = read_packet(&mut buf, &mut pacer).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn reassembles_fragments_at_the_16mib_boundary() {
        let first_chunk = vec![0xABu8; MAX_PACKET_PAYLOAD];
        let mut wire = Vec::new();
        let len_bytes = (MAX_PACKET_PAYLOAD as u32).to_le_bytes();
        wire.extend_from_slice(&len_bytes[..3]);
        wire.push(0);
        wire.extend_from_slice(&first_chunk);
        // terminator fragment
        wire.extend_from_slice(&[2, 0, 0, 1]);
        wire.extend_from_slice(b"ab");

        let mut buf = mock(wire);
        let mut pacer = SequencePacer::default();
        let payload = read_packet(&mut buf, &mut pacer).unwrap();
        assert_eq!(payload.len(), MAX_PACKET_PAYLOAD + 2);
        assert_eq!(&payload[MAX_PACKET_PAYLOAD..], b"ab");
    }

    #[test]
    fn write_packet_emits_correct_header() {
        let mut buf = mock(Vec::new());
        let mut pacer = SequencePacer::default();
        write_packet(&mut buf, &mut pacer, b"ping").unwrap();
        let sent = buf.stream_mut().0.get_ref();
        assert_eq!(&sent[..4], &[4, 0, 0, 0]);
        assert_eq!(&sent[4..], b"ping");
    }

    #[test]
    fn write_packet_appends_empty_terminator_at_exact_boundary() {
        let mut buf = mock(Vec::new());
        let mut pacer = SequencePacer::default();
        let payload = vec![0xABu8; MAX_PACKET_PAYLOAD];
        write_packet(&mut buf, &mut pacer, &payload).unwrap();
        let sent = buf.stream_mut().0.get_ref();
        assert_eq!(sent.len(), 4 + MAX_PACKET_PAYLOAD + 4);
        let terminator = &sent[4 + MAX_PACKET_PAYLOAD..];
        assert_eq!(&terminator[..4], &[0, 0, 0, 1]);
    }

    #[test]
    fn sequence_pacer_resets_between_commands() {
        let mut pacer = SequencePacer::default();
        pacer.expect_and_advance(0).unwrap();
        pacer.expect_and_advance(1).unwrap();
        pacer.reset();
        pacer.expect_and_advance(0).unwrap();
    }
}
