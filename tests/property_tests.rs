//! Property-based tests for binding and value marshaling
//!
//! These tests verify that:
//! - Binding checks the value count against the parameter count
//! - Values survive a bind/select round trip with their storage class
//! - Integer and unsigned coercions pick the documented wire form

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sqlstep::{params, Connection, SqlstepError, Value, WireKind};

    // Test infrastructure

    fn placeholders(count: usize) -> String {
        let marks: Vec<String> = (0..count).map(|i| format!("? AS c{}", i)).collect();
        format!("SELECT {}", marks.join(", "))
    }

    fn select_one(conn: &Connection, value: Value) -> Value {
        let mut stmt = conn.prepare("SELECT ?").unwrap();
        stmt.bind(&[value]).unwrap().query_scalar().unwrap()
    }

    proptest! {
        /// Binding n values to a statement with k parameters fails unless n == k > 0
        #[test]
        fn prop_bind_arity_is_checked(k in 0usize..6, n in 0usize..8) {
            let conn = Connection::open_in_memory().unwrap();
            let sql = if k == 0 { "SELECT 1".to_string() } else { placeholders(k) };
            let mut stmt = conn.prepare(&sql).unwrap();
            prop_assert_eq!(stmt.parameter_count(), k);

            let values: Vec<Value> = (0..n as i64).map(Value::from).collect();
            let result = stmt.bind(&values).map(|_| ());

            if k > 0 && n == k {
                prop_assert!(result.is_ok());
                prop_assert!(stmt.is_bound());
            } else {
                let is_arity_error = matches!(
                    result,
                    Err(SqlstepError::BindArity { expected, supplied }) if expected == k && supplied == n
                );
                prop_assert!(is_arity_error);
            }
        }

        #[test]
        fn prop_integer_round_trip(v in any::<i64>()) {
            let conn = Connection::open_in_memory().unwrap();
            prop_assert_eq!(select_one(&conn, Value::from(v)), Value::Integer(v));
        }

        #[test]
        fn prop_real_round_trip(v in -1.0e300f64..1.0e300f64) {
            let conn = Connection::open_in_memory().unwrap();
            prop_assert_eq!(select_one(&conn, Value::from(v)), Value::Real(v));
        }

        #[test]
        fn prop_text_round_trip(s in "[^\u{0}]{0,64}") {
            let conn = Connection::open_in_memory().unwrap();
            prop_assert_eq!(select_one(&conn, Value::from(s.as_str())), Value::Text(s));
        }

        #[test]
        fn prop_blob_round_trip(b in proptest::collection::vec(any::<u8>(), 1..64)) {
            let conn = Connection::open_in_memory().unwrap();
            prop_assert_eq!(select_one(&conn, Value::from(b.clone())), Value::Blob(b));
        }

        #[test]
        fn prop_optional_round_trip(v in proptest::option::of(any::<i32>())) {
            let conn = Connection::open_in_memory().unwrap();
            let expected = match v {
                Some(i) => Value::Integer(i64::from(i)),
                None => Value::Null,
            };
            prop_assert_eq!(select_one(&conn, Value::from(v)), expected);
        }

        /// Values that fit in 32 bits use the narrow integer binding
        #[test]
        fn prop_wire_kind_follows_range(v in any::<i64>()) {
            let kind = Value::from(v).wire_kind();
            if i32::try_from(v).is_ok() {
                prop_assert_eq!(kind, WireKind::Int32);
            } else {
                prop_assert_eq!(kind, WireKind::Int64);
            }
        }

        /// Unsigned values beyond the signed range are carried as decimal text
        #[test]
        fn prop_wide_unsigned_becomes_text(v in (i64::MAX as u64 + 1)..=u64::MAX) {
            let conn = Connection::open_in_memory().unwrap();
            prop_assert_eq!(select_one(&conn, Value::from(v)), Value::Text(v.to_string()));
        }
    }

    #[test]
    fn test_rebinding_replaces_every_value() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare(&placeholders(3)).unwrap();

        stmt.bind(&params![1, "two", 3.0]).unwrap();
        let first = stmt.query_row(|row| row.values()).unwrap().unwrap();
        stmt.bind(&params![None::<i64>, 5, "six"]).unwrap();
        let second = stmt.query_row(|row| row.values()).unwrap().unwrap();

        assert_eq!(
            first,
            vec![Value::Integer(1), Value::Text("two".into()), Value::Real(3.0)]
        );
        assert_eq!(
            second,
            vec![Value::Null, Value::Integer(5), Value::Text("six".into())]
        );
    }
}
