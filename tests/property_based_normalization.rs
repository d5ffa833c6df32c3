//! Property-based tests for statement normalization
//!
//! Statements are generated from a SQL-like token vocabulary so that the
//! properties exercise realistic shapes rather than random byte noise.

use proptest::prelude::*;
use querylens::normalize::normalize_statement;

fn token() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec![
            "SELECT", "select", "FROM", "WHERE", "AND", "OR", "IN", "VALUES", "INSERT", "INTO",
            "UPDATE", "SET", "ORDER", "BY", "LIMIT", "JOIN", "ON", "*", "=", "<", ">", "(", ")",
            ",", "users", "Posts", "t1", "col_2", "\"Quoted\"", "`tick`", "$1", "?", ":name",
            "@p1", "--", "/*", "*/", ";", "TRUE", "false", "$$", "$q$", "[", "]", ":", "-",
            ".5", "ARRAY[",
        ])
        .prop_map(str::to_string),
        any::<i64>().prop_map(|n| n.to_string()),
        any::<u16>().prop_map(|n| format!("{}.{}", n, n % 100)),
        "[a-zA-Z0-9 ]{0,10}".prop_map(|s| format!("'{}'", s)),
        "[a-z]{1,6}".prop_map(|s| s),
    ]
}

fn statement() -> impl Strategy<Value = String> {
    prop::collection::vec(token(), 0..24).prop_map(|tokens| tokens.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_normalization_is_idempotent(sql in statement()) {
        let once = normalize_statement(&sql);
        let twice = normalize_statement(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_normalization_never_panics(sql in ".{0,200}") {
        let _ = normalize_statement(&sql);
    }

    #[test]
    fn prop_output_has_no_redundant_whitespace(sql in statement()) {
        let shape = normalize_statement(&sql);
        prop_assert!(!shape.contains("  "));
        prop_assert_eq!(shape.trim(), shape.as_str());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_literal_values_do_not_change_shape(
        a in any::<i64>(),
        b in any::<i64>(),
        name_a in "[a-zA-Z0-9 ']{0,16}",
        name_b in "[a-zA-Z0-9 ']{0,16}",
        price in 0.0f64..1e6,
    ) {
        let template = |id: i64, name: &str, price: f64| {
            format!(
                "SELECT * FROM users WHERE id = {} AND name = '{}' AND price > {}",
                id,
                name.replace('\'', "''"),
                price
            )
        };
        prop_assert_eq!(
            normalize_statement(&template(a, &name_a, price)),
            normalize_statement(&template(b, &name_b, 1.5))
        );
    }

    #[test]
    fn prop_in_list_length_does_not_change_shape(ids in prop::collection::vec(any::<u32>(), 1..20)) {
        let list = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ");
        let shape = normalize_statement(&format!("SELECT * FROM posts WHERE author_id IN ({})", list));
        prop_assert_eq!(shape, "select * from posts where author_id in (?)");
    }

    #[test]
    fn prop_multi_row_values_collapse(rows in 1usize..12) {
        let values = (0..rows)
            .map(|i| format!("({}, 'title {}')", i, i))
            .collect::<Vec<_>>()
            .join(", ");
        let shape = normalize_statement(&format!("INSERT INTO posts (id, title) VALUES {}", values));
        prop_assert_eq!(shape, "insert into posts (id, title) values (?)");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_boolean_literals_do_not_change_shape(a in any::<bool>(), b in any::<bool>(), upper in any::<bool>()) {
        let literal = |flag: bool| {
            let text = flag.to_string();
            if upper { text.to_uppercase() } else { text }
        };
        let template = |flag: bool| format!("SELECT * FROM users WHERE active = {} AND id = 1", literal(flag));
        prop_assert_eq!(normalize_statement(&template(a)), normalize_statement(&template(b)));
        prop_assert_eq!(normalize_statement(&template(a)), "select * from users where active = ? and id = ?");
    }

    #[test]
    fn prop_signed_array_elements_do_not_change_shape(values in prop::collection::vec(any::<i32>(), 1..8)) {
        let array = |items: Vec<String>| {
            format!("SELECT * FROM events WHERE kind = ANY(ARRAY[{}])", items.join(", "))
        };
        let signed = array(values.iter().map(|v| v.to_string()).collect());
        let unsigned = array(values.iter().map(|v| v.unsigned_abs().to_string()).collect());
        prop_assert_eq!(normalize_statement(&signed), normalize_statement(&unsigned));
    }

    #[test]
    fn prop_decimal_spelling_does_not_change_shape(whole in 0u32..1000, frac in 0u32..1000, negative in any::<bool>()) {
        let sign = if negative { "-" } else { "" };
        let leading_dot = format!("SELECT * FROM items WHERE price > {}.{}", sign, frac);
        let full = format!("SELECT * FROM items WHERE price > {}.{}", whole, frac);
        prop_assert_eq!(normalize_statement(&leading_dot), normalize_statement(&full));
    }

    #[test]
    fn prop_dollar_quoted_bodies_do_not_change_shape(
        tag in "([a-z_][a-z0-9_]{0,4})?",
        body_a in "[a-zA-Z0-9 ',;()-]{0,24}",
        body_b in "[a-zA-Z0-9 ',;()-]{0,24}",
    ) {
        let template = |body: &str| format!("UPDATE docs SET content = ${tag}${body}${tag}$ WHERE id = 7", tag = tag, body = body);
        prop_assert_eq!(normalize_statement(&template(&body_a)), normalize_statement(&template(&body_b)));
        prop_assert_eq!(normalize_statement(&template(&body_a)), "update docs set content = ? where id = ?");
    }
}
