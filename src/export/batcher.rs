use super::value::{serialize, SqlValue};

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1_000;

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Groups rows of one table into multi-row INSERT statements.
///
/// Text accumulates until [`StatementBatcher::flush`] drains it, so callers decide
/// when it reaches the output. A statement never holds more than `limit` rows.
pub struct StatementBatcher {
    header: String,
    limit: usize,
    rows_in_statement: usize,
    statements: usize,
    buf: String,
}

impl StatementBatcher {
    pub fn new(table: &str, columns: &[String], limit: usize) -> Self {
        let cols = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        StatementBatcher {
            header: format!("INSERT INTO {} ({}) VALUES ", quote_ident(table), cols),
            limit: limit.max(1),
            rows_in_statement: 0,
            statements: 0,
            buf: String::new(),
        }
    }

    fn begin_statement(&mut self) {
        self.buf.push_str(&self.header);
        self.statements += 1;
    }

    pub fn append_row(&mut self, values: &[SqlValue]) {
        if self.rows_in_statement == 0 {
            self.begin_statement();
        } else {
            self.buf.push_str(", ");
        }

        self.buf.push('(');
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            self.buf.push_str(&serialize(value));
        }
        self.buf.push(')');

        self.rows_in_statement += 1;
        if self.rows_in_statement == self.limit {
            self.finish();
        }
    }

    /// Closes the open statement, if any.
    pub fn finish(&mut self) {
        if self.rows_in_statement > 0 {
            self.buf.push_str(";\n");
            self.rows_in_statement = 0;
        }
    }

    /// Takes the text produced since the last flush.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }

    /// Statements started so far.
    pub fn statements(&self) -> usize {
        self.statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols() -> Vec<String> {
        vec!["id".into(), "name".into()]
    }

    fn row(i: i64) -> Vec<SqlValue> {
        vec![SqlValue::Int(i), SqlValue::Text(format!("user{}", i))]
    }

    #[test]
    fn single_statement() {
        let mut b = StatementBatcher::new("users", &cols(), 1000);
        b.append_row(&row(1));
        b.append_row(&row(2));
        b.finish();
        assert_eq!(
            b.flush(),
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES (1, 'user1'), (2, 'user2');\n"
        );
        assert_eq!(b.statements(), 1);
    }

    #[test]
    fn statement_count_is_ceil_of_rows_over_limit() {
        for (n, limit, expected) in [(0, 3, 0), (1, 3, 1), (3, 3, 1), (4, 3, 2), (10, 3, 4)] {
            let mut b = StatementBatcher::new("t", &cols(), limit);
            for i in 0..n {
                b.append_row(&row(i));
            }
            b.finish();
            let text = b.flush();
            assert_eq!(b.statements(), expected, "n={} limit={}", n, limit);
            assert_eq!(text.matches("INSERT INTO").count(), expected);
            for stmt in text.lines() {
                assert!(stmt.matches("'user").count() <= limit);
                assert!(stmt.ends_with(';'));
            }
        }
    }

    #[test]
    fn rows_keep_their_order_across_statements() {
        let mut b = StatementBatcher::new("t", &cols(), 2);
        for i in 0..5 {
            b.append_row(&row(i));
        }
        b.finish();
        let text = b.flush();
        let positions: Vec<usize> = (0..5)
            .map(|i| text.find(&format!("'user{}'", i)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn flush_drains_partial_statement() {
        let mut b = StatementBatcher::new("t", &cols(), 10);
        b.append_row(&row(1));
        let first = b.flush();
        assert!(first.starts_with("INSERT INTO"));
        assert!(!first.ends_with(";\n"));
        b.append_row(&row(2));
        b.finish();
        assert_eq!(b.flush(), ", (2, 'user2');\n");
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
