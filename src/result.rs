//! Execution result accounting. Grounded on
//! `examples/original_source/result.go`'s `mysqlResult`, which keeps one
//! entry per executed statement rather than collapsing a multi-statement
//! batch down to a single pair of numbers.

#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    affected_rows: Vec<u64>,
    insert_ids: Vec<u64>,
}

impl ExecResult {
    pub fn push(&mut self, affected_rows: u64, insert_id: u64) {
        self.affected_rows.push(affected_rows);
        self.insert_ids.push(insert_id);
    }

    /// Affected rows of the last executed statement, matching
    /// `driver.Result::RowsAffected`.
    pub fn rows_affected(&self) -> u64 {
        self.affected_rows.last().copied().unwrap_or(0)
    }

    /// Last insert ID of the last executed statement, matching
    /// `driver.Result::LastInsertId`.
    pub fn last_insert_id(&self) -> u64 {
        self.insert_ids.last().copied().unwrap_or(0)
    }

    /// Affected rows for every statement in a multi-statement batch, in
    /// execution order.
    pub fn all_rows_affected(&self) -> &[u64] {
        &self.affected_rows
    }

    /// Insert IDs for every statement in a multi-statement batch, in
    /// execution order.
    pub fn all_last_insert_ids(&self) -> &[u64] {
        &self.insert_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_statement_exposes_its_own_values() {
        let mut result = ExecResult::default();
        result.push(3, 42);
        assert_eq!(result.rows_affected(), 3);
        assert_eq!(result.last_insert_id(), 42);
        assert_eq!(result.all_rows_affected(), &[3]);
    }

    #[test]
    fn multi_statement_batch_accumulates_and_exposes_the_last() {
        let mut result = ExecResult::default();
        result.push(1, 10);
        result.push(5, 11);
        assert_eq!(result.rows_affected(), 5);
        assert_eq!(result.last_insert_id(), 11);
        assert_eq!(result.all_rows_affected(), &[1, 5]);
        assert_eq!(result.all_last_insert_ids(), &[10, 11]);
    }

    #[test]
    fn empty_result_defaults_to_zero() {
        let result = ExecResult::default();
        assert_eq!(result.rows_affected(), 0);
        assert_eq!(result.last_insert_id(), 0);
    }
}
