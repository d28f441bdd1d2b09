use jobchat_contracts::{MAX_ROW_CAP, SchemaDescriptor, canonical};

use crate::extract::CandidateQuery;
use crate::lexer::{self, Token};

/// A statement that passed every check in [`validate`].
///
/// There is no other constructor; holding one is the proof of validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    row_bound: usize,
    table: &'static str,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn row_bound(&self) -> usize {
        self.row_bound
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Stable identifier for logs, so statements are traceable without
    /// printing them at info level.
    pub fn fingerprint(&self) -> String {
        canonical::sha256_hex(self.sql.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCheck {
    SingleStatement,
    ReadOnly,
    TableScope,
    RowBound,
}

impl ValidationCheck {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationCheck::SingleStatement => "single_statement",
            ValidationCheck::ReadOnly => "read_only",
            ValidationCheck::TableScope => "table_scope",
            ValidationCheck::RowBound => "row_bound",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub check: ValidationCheck,
    pub message: String,
}

impl ValidationFailure {
    fn new(check: ValidationCheck, message: impl Into<String>) -> Self {
        Self {
            check,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} check failed: {}", self.check.as_str(), self.message)
    }
}

impl std::error::Error for ValidationFailure {}

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "ALTER", "ANALYZE", "ATTACH", "BEGIN", "CALL", "CHECKPOINT", "CLUSTER", "COMMENT", "COMMIT",
    "COPY", "CREATE", "DEALLOCATE", "DELETE", "DETACH", "DISCARD", "DO", "DROP", "EXEC",
    "EXECUTE", "GRANT", "IMPORT", "INSERT", "INTO", "LISTEN", "LOAD", "LOCK", "LOCKED", "MERGE",
    "NOTIFY", "NOWAIT", "PREPARE", "REASSIGN", "REFRESH", "REINDEX", "RELEASE", "RENAME",
    "RESET", "REVOKE", "ROLLBACK", "SAVEPOINT", "SECURITY", "SET", "SHARE", "TRUNCATE",
    "UNLISTEN", "UPDATE", "UPSERT", "VACUUM",
];

// Anything called like a function must be one of these. Type names appear
// here for casts such as `salary::numeric(12, 2)`.
const ALLOWED_FUNCTIONS: &[&str] = &[
    "abs", "avg", "btrim", "cast", "ceil", "ceiling", "char_length", "coalesce", "concat",
    "concat_ws", "count", "date_part", "date_trunc", "decimal", "dense_rank", "extract",
    "floor", "greatest", "initcap", "least", "left", "length", "lower", "ltrim", "max", "min",
    "now", "nullif", "numeric", "position", "rank", "replace", "right", "round", "row_number",
    "rtrim", "split_part", "string_agg", "strpos", "substr", "substring", "sum", "to_char",
    "trim", "trunc", "upper", "varchar",
];

// Keywords that may precede `(` without being a call.
const PAREN_KEYWORDS: &[&str] = &[
    "ALL", "AND", "ANY", "ARRAY", "AS", "BETWEEN", "BY", "DISTINCT", "ELSE", "EXCEPT", "EXISTS",
    "FILTER", "FROM", "GROUP", "HAVING", "ILIKE", "IN", "INTERSECT", "IS", "JOIN", "LATERAL",
    "LIKE", "LIMIT", "NOT", "OFFSET", "ON", "OR", "OVER", "ROW", "SELECT", "SOME", "THEN",
    "UNION", "USING", "VALUES", "WHEN", "WHERE",
];

const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "pg_catalog", "pg_toast"];

// Words that end a FROM item; an alias may not be one of these.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "LIMIT", "OFFSET", "HAVING", "UNION", "INTERSECT", "EXCEPT",
    "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "ON", "USING", "WINDOW",
    "FETCH", "FOR", "TABLESAMPLE",
];

/// Checks a candidate against the read-only policy for `schema`, first
/// failing check wins:
///
/// 1. exactly one statement,
/// 2. read-only `SELECT` with no mutating keyword, calling only allow-listed
///    functions,
/// 3. only `schema.table` referenced after `FROM`, `JOIN` or `TABLE`, no
///    system catalogs,
/// 4. a top-level `LIMIT` no larger than `cap` (injected or lowered).
pub fn validate(
    candidate: &CandidateQuery,
    schema: &SchemaDescriptor,
    cap: usize,
) -> Result<ValidatedQuery, ValidationFailure> {
    let cap = cap.clamp(1, MAX_ROW_CAP);

    let mut tokens = check_single_statement(candidate.as_str())?;
    check_read_only(&tokens)?;
    check_table_scope(&tokens, schema.table)?;
    let row_bound = enforce_row_bound(&mut tokens, cap)?;

    Ok(ValidatedQuery {
        sql: lexer::render(&tokens),
        row_bound,
        table: schema.table,
    })
}

fn check_single_statement(sql: &str) -> Result<Vec<Token>, ValidationFailure> {
    let mut tokens = lexer::tokenize(sql)
        .map_err(|err| ValidationFailure::new(ValidationCheck::SingleStatement, err.to_string()))?;

    if tokens.last().is_some_and(|t| t.is_punct(';')) {
        tokens.pop();
    }

    if tokens.iter().any(|t| t.is_punct(';')) {
        return Err(ValidationFailure::new(
            ValidationCheck::SingleStatement,
            "statement separator outside a string literal",
        ));
    }

    if tokens.is_empty() {
        return Err(ValidationFailure::new(
            ValidationCheck::SingleStatement,
            "empty statement",
        ));
    }

    // The executor nests the statement inside its own query, so a stray
    // `)` could close that wrapper.
    let mut depth = 0usize;
    for token in &tokens {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth = depth.checked_sub(1).ok_or_else(|| {
                ValidationFailure::new(ValidationCheck::SingleStatement, "unbalanced parentheses")
            })?;
        }
    }
    if depth != 0 {
        return Err(ValidationFailure::new(
            ValidationCheck::SingleStatement,
            "unbalanced parentheses",
        ));
    }

    Ok(tokens)
}

fn check_read_only(tokens: &[Token]) -> Result<(), ValidationFailure> {
    if !tokens.first().is_some_and(|t| t.is_word("SELECT")) {
        return Err(ValidationFailure::new(
            ValidationCheck::ReadOnly,
            "statement must start with SELECT",
        ));
    }

    for token in tokens {
        if let Token::Word(word) = token
            && let Some(keyword) = FORBIDDEN_KEYWORDS
                .iter()
                .find(|k| word.eq_ignore_ascii_case(k))
        {
            return Err(ValidationFailure::new(
                ValidationCheck::ReadOnly,
                format!("keyword {} is not allowed", keyword),
            ));
        }
    }

    for (idx, token) in tokens.iter().enumerate() {
        if !tokens.get(idx + 1).is_some_and(|t| t.is_punct('(')) {
            continue;
        }
        let name = match token {
            Token::Word(w) if PAREN_KEYWORDS.iter().any(|k| w.eq_ignore_ascii_case(k)) => {
                continue;
            }
            Token::Word(w) => w.to_ascii_lowercase(),
            Token::QuotedIdent(q) => q.clone(),
            _ => continue,
        };
        if !ALLOWED_FUNCTIONS.contains(&name.as_str()) {
            return Err(ValidationFailure::new(
                ValidationCheck::ReadOnly,
                format!("function {} is not allowed", name),
            ));
        }
    }

    Ok(())
}

fn check_table_scope(tokens: &[Token], table: &str) -> Result<(), ValidationFailure> {
    for token in tokens {
        if let Some(name) = token.ident() {
            let lowered = name.to_ascii_lowercase();
            if lowered.starts_with("pg_") || SYSTEM_SCHEMAS.contains(&lowered.as_str()) {
                return Err(ValidationFailure::new(
                    ValidationCheck::TableScope,
                    format!("system object {} is not allowed", lowered),
                ));
            }
        }
    }

    // true when the innermost parenthesis holds a query rather than call arguments,
    // so `EXTRACT(YEAR FROM ...)` is not mistaken for a relation list
    let mut query_context = vec![true];
    let mut references = 0usize;
    let mut idx = 0;

    while idx < tokens.len() {
        let token = &tokens[idx];

        if token.is_punct('(') {
            query_context.push(tokens.get(idx + 1).is_some_and(|t| t.is_word("SELECT")));
        } else if token.is_punct(')') {
            query_context.pop();
        } else if token.is_word("JOIN") || token.is_word("TABLE") {
            references += check_relation_list(tokens, idx + 1, table, false)?;
        } else if token.is_word("FROM") && query_context.last().copied().unwrap_or(false) {
            references += check_relation_list(tokens, idx + 1, table, true)?;
        }

        idx += 1;
    }

    if references == 0 {
        return Err(ValidationFailure::new(
            ValidationCheck::TableScope,
            format!("statement must read from {}", table),
        ));
    }

    Ok(())
}

// Walks the FROM items starting at `idx`, returning how many named `table`.
// Parenthesized items are subqueries or grouped joins; the outer scan checks
// their contents.
fn check_relation_list(
    tokens: &[Token],
    mut idx: usize,
    table: &str,
    allow_list: bool,
) -> Result<usize, ValidationFailure> {
    let scope_error =
        |message: String| ValidationFailure::new(ValidationCheck::TableScope, message);
    let mut references = 0;

    loop {
        while tokens
            .get(idx)
            .is_some_and(|t| t.is_word("ONLY") || t.is_word("LATERAL"))
        {
            idx += 1;
        }

        match tokens.get(idx) {
            Some(t) if t.is_punct('(') => return Ok(references),
            Some(t) if t.ident().is_some() => {}
            _ => return Err(scope_error("expected a table name".to_string())),
        }

        let mut parts = Vec::new();
        while let Some(token) = tokens.get(idx) {
            let part = match token {
                Token::Word(w) => w.to_ascii_lowercase(),
                Token::QuotedIdent(q) => q.clone(),
                _ => break,
            };
            parts.push(part);
            idx += 1;
            if tokens.get(idx).is_some_and(|t| t.is_punct('.')) {
                idx += 1;
            } else {
                break;
            }
        }

        let relation = match parts.as_slice() {
            [name] => name.as_str(),
            [schema, name] if schema == "public" => name.as_str(),
            _ => return Err(scope_error(format!("relation {} is not allowed", parts.join(".")))),
        };

        if relation != table {
            return Err(scope_error(format!("relation {} is not allowed", relation)));
        }
        references += 1;

        if !allow_list {
            return Ok(references);
        }

        if tokens.get(idx).is_some_and(|t| t.is_word("AS")) {
            idx += 1;
        }
        if let Some(alias) = tokens.get(idx)
            && alias.ident().is_some()
            && !CLAUSE_KEYWORDS.iter().any(|k| alias.is_word(k))
        {
            idx += 1;
        }

        if tokens.get(idx).is_some_and(|t| t.is_punct(',')) {
            idx += 1;
        } else {
            return Ok(references);
        }
    }
}

const TAIL_MESSAGE: &str = "LIMIT must end the statement or be followed by OFFSET <integer>";

fn enforce_row_bound(tokens: &mut Vec<Token>, cap: usize) -> Result<usize, ValidationFailure> {
    let bound_error = |message: &str| ValidationFailure::new(ValidationCheck::RowBound, message);

    let mut depth = 0usize;
    let mut limit_positions = Vec::new();
    for (idx, token) in tokens.iter().enumerate() {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth -= 1;
        } else if depth == 0 && token.is_word("FETCH") {
            return Err(bound_error("FETCH clauses are not supported; use LIMIT"));
        } else if depth == 0 && token.is_word("LIMIT") {
            limit_positions.push(idx);
        }
    }

    let limit_idx = match limit_positions.as_slice() {
        [] => {
            tokens.push(Token::Word("LIMIT".to_string()));
            tokens.push(Token::Number(cap.to_string()));
            return Ok(cap);
        }
        [idx] => *idx,
        _ => return Err(bound_error("more than one top-level LIMIT")),
    };

    let value_idx = limit_idx + 1;
    let (bound, tail_idx) = match tokens.get(value_idx) {
        Some(t) if t.is_word("ALL") => {
            tokens[value_idx] = Token::Number(cap.to_string());
            (cap, value_idx + 1)
        }
        // MySQL `LIMIT offset, count`
        Some(Token::Number(offset))
            if tokens.get(value_idx + 1).is_some_and(|t| t.is_punct(',')) =>
        {
            let offset = offset.clone();
            parse_row_count(&offset)
                .ok_or_else(|| bound_error("LIMIT must be a non-negative integer"))?;
            let count = match tokens.get(value_idx + 2) {
                Some(Token::Number(raw)) => parse_row_count(raw)
                    .ok_or_else(|| bound_error("LIMIT must be a non-negative integer"))?,
                _ => return Err(bound_error("LIMIT must be a literal integer")),
            };
            if value_idx + 3 != tokens.len() {
                return Err(bound_error(TAIL_MESSAGE));
            }
            let bound = count.min(cap);
            tokens.splice(
                value_idx..value_idx + 3,
                [
                    Token::Number(bound.to_string()),
                    Token::Word("OFFSET".to_string()),
                    Token::Number(offset),
                ],
            );
            return Ok(bound);
        }
        Some(Token::Number(raw)) => {
            let requested = parse_row_count(raw)
                .ok_or_else(|| bound_error("LIMIT must be a non-negative integer"))?;
            let bound = requested.min(cap);
            tokens[value_idx] = Token::Number(bound.to_string());
            (bound, value_idx + 1)
        }
        _ => return Err(bound_error("LIMIT must be a literal integer")),
    };

    // Only a literal OFFSET may follow the count; any other token would
    // extend the count expression past the bound.
    match &tokens[tail_idx..] {
        [] => Ok(bound),
        [offset, Token::Number(raw)]
            if offset.is_word("OFFSET") && parse_row_count(raw).is_some() =>
        {
            Ok(bound)
        }
        _ => Err(bound_error(TAIL_MESSAGE)),
    }
}

// Values too large for usize are still valid requests; they clamp to the cap.
fn parse_row_count(raw: &str) -> Option<usize> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(raw.parse::<usize>().unwrap_or(usize::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobchat_contracts::JOBS_SCHEMA;

    fn check(sql: &str) -> Result<ValidatedQuery, ValidationFailure> {
        validate(&CandidateQuery::new(sql), &JOBS_SCHEMA, 20)
    }

    fn failed_check(sql: &str) -> ValidationCheck {
        check(sql).expect_err("statement must be rejected").check
    }

    #[test]
    fn accepts_location_search_and_keeps_smaller_limit() {
        let validated =
            check("SELECT * FROM jobs WHERE location ILIKE '%Mumbai%' LIMIT 10;").expect("valid");
        assert_eq!(
            validated.sql(),
            "SELECT * FROM jobs WHERE location ILIKE '%Mumbai%' LIMIT 10"
        );
        assert_eq!(validated.row_bound(), 10);
        assert_eq!(validated.table(), "jobs");
    }

    #[test]
    fn injects_limit_when_missing() {
        let validated = check("select title, salary from Jobs order by salary desc").expect("valid");
        assert_eq!(
            validated.sql(),
            "select title, salary from Jobs order by salary desc LIMIT 20"
        );
        assert_eq!(validated.row_bound(), 20);
    }

    #[test]
    fn lowers_limit_above_cap_and_never_raises_one_below() {
        for (requested, expected) in [(0, 0), (1, 1), (19, 19), (20, 20), (21, 20), (1000, 20)] {
            let validated =
                check(&format!("SELECT id FROM jobs LIMIT {}", requested)).expect("valid");
            assert_eq!(validated.row_bound(), expected, "LIMIT {}", requested);
            assert!(validated.row_bound() <= MAX_ROW_CAP);
            assert!(validated.sql().ends_with(&format!("LIMIT {}", expected)));
        }

        let huge = check("SELECT id FROM jobs LIMIT 99999999999999999999999").expect("valid");
        assert_eq!(huge.row_bound(), 20);
    }

    #[test]
    fn configured_cap_below_twenty_is_respected() {
        let validated = validate(&CandidateQuery::new("SELECT id FROM jobs LIMIT 15"), &JOBS_SCHEMA, 5)
            .expect("valid");
        assert_eq!(validated.row_bound(), 5);

        let over_hard_limit =
            validate(&CandidateQuery::new("SELECT id FROM jobs"), &JOBS_SCHEMA, 500).expect("valid");
        assert_eq!(over_hard_limit.row_bound(), MAX_ROW_CAP);
    }

    #[test]
    fn limit_all_and_mysql_offset_form_are_rewritten() {
        let all = check("SELECT id FROM jobs LIMIT ALL").expect("valid");
        assert_eq!(all.sql(), "SELECT id FROM jobs LIMIT 20");

        let mysql = check("SELECT id FROM jobs LIMIT 40, 100").expect("valid");
        assert_eq!(mysql.sql(), "SELECT id FROM jobs LIMIT 20 OFFSET 40");
        assert_eq!(mysql.row_bound(), 20);
    }

    #[test]
    fn subquery_limit_does_not_count_as_the_row_bound() {
        let validated = check(
            "SELECT * FROM jobs WHERE salary > (SELECT avg(salary) FROM jobs LIMIT 1000)",
        )
        .expect("valid");
        assert!(validated.sql().ends_with(") LIMIT 20"));
        assert!(validated.sql().contains("LIMIT 1000"));
    }

    #[test]
    fn rejects_non_literal_limits_and_fetch() {
        assert_eq!(
            failed_check("SELECT id FROM jobs LIMIT (SELECT 100)"),
            ValidationCheck::RowBound
        );
        assert_eq!(
            failed_check("SELECT id FROM jobs FETCH FIRST 100 ROWS ONLY"),
            ValidationCheck::RowBound
        );
        assert_eq!(
            failed_check("SELECT id FROM jobs LIMIT 1.5"),
            ValidationCheck::RowBound
        );
    }

    #[test]
    fn rejects_multiple_statements_outside_literals_only() {
        assert_eq!(
            failed_check("SELECT * FROM jobs; DROP TABLE jobs"),
            ValidationCheck::SingleStatement
        );
        assert_eq!(
            failed_check("SELECT * FROM jobs;;"),
            ValidationCheck::SingleStatement
        );
        assert_eq!(failed_check("  ;  "), ValidationCheck::SingleStatement);

        check("SELECT * FROM jobs WHERE title = 'a; b'").expect("separator in literal is fine");
    }

    #[test]
    fn rejects_mutation_keywords_in_any_case() {
        for sql in [
            "DROP TABLE jobs",
            "drop table jobs",
            "DeLeTe FROM jobs",
            "UPDATE jobs SET salary = 0",
            "insert into jobs (title) values ('x')",
            "TRUNCATE jobs",
            "SELECT * INTO backup FROM jobs",
            "SELECT * FROM jobs FOR UPDATE",
            "sElEcT * FROM jobs FOR share",
            "WITH gone AS (DELETE FROM jobs RETURNING *) SELECT * FROM gone",
        ] {
            assert_eq!(failed_check(sql), ValidationCheck::ReadOnly, "{}", sql);
        }
    }

    #[test]
    fn rejects_side_effecting_functions() {
        for sql in [
            "SELECT pg_sleep(30) FROM jobs",
            "SELECT \"pg_sleep\"(30) FROM jobs",
            "SELECT set_config('statement_timeout', '0', false) FROM jobs",
            "SELECT query_to_xml('delete from jobs', true, true, '') FROM jobs",
            "SELECT lo_import('/etc/passwd') FROM jobs",
            "SELECT * FROM generate_series(1, 10)",
            "SELECT * FROM jobs(1)",
        ] {
            assert_eq!(failed_check(sql), ValidationCheck::ReadOnly, "{}", sql);
        }
    }

    #[test]
    fn rejects_xml_export_functions_that_read_other_tables() {
        for (sql, function) in [
            ("SELECT schema_to_xml('public', true, false, '') FROM jobs", "schema_to_xml"),
            (
                "SELECT schema_to_xml_and_xmlschema('public', true, false, '') FROM jobs",
                "schema_to_xml_and_xmlschema",
            ),
            (
                "SELECT database_to_xml_and_xmlschema(true, false, '') FROM jobs",
                "database_to_xml_and_xmlschema",
            ),
            (
                "SELECT table_to_xml_and_xmlschema('applications', true, false, '') FROM jobs",
                "table_to_xml_and_xmlschema",
            ),
            ("SELECT cursor_to_xml('c', 10, true, false, '') FROM jobs", "cursor_to_xml"),
            ("SELECT Query_To_Xml('select 1', true, true, '') FROM jobs", "query_to_xml"),
        ] {
            let failure = check(sql).expect_err("export function must be rejected");
            assert_eq!(failure.check, ValidationCheck::ReadOnly, "{}", sql);
            assert_eq!(failure.message, format!("function {} is not allowed", function));
        }
    }

    #[test]
    fn accepts_common_functions_and_parenthesized_clauses() {
        for sql in [
            "SELECT lower(title), upper(location) FROM jobs",
            "SELECT count(*), avg(salary), min(salary), max(salary), sum(salary) FROM jobs",
            "SELECT coalesce(nullif(trim(location), ''), 'Remote') FROM jobs",
            "SELECT round(salary::numeric(12, 2), 0) FROM jobs",
            "SELECT CAST(salary AS integer) FROM jobs WHERE id IN (1, 2, 3)",
            "SELECT * FROM jobs WHERE EXISTS (SELECT 1 FROM jobs WHERE salary > 0)",
            "SELECT DISTINCT ON (location) location, title FROM jobs",
            "SELECT title, row_number() OVER (PARTITION BY location ORDER BY salary) FROM jobs",
        ] {
            check(sql).unwrap_or_else(|err| panic!("{} should be accepted: {}", sql, err));
        }
    }

    #[test]
    fn keywords_inside_literals_and_identifiers_are_not_flagged() {
        check("SELECT * FROM jobs WHERE description ILIKE '%update your resume%'")
            .expect("literal text is data");
        check("SELECT * FROM jobs WHERE title ILIKE '%Drop shipping%' OR title = 'DELETE'")
            .expect("literal text is data");
    }

    #[test]
    fn rejects_other_tables_and_catalogs() {
        for sql in [
            "SELECT * FROM applications",
            "SELECT * FROM jobs JOIN applications ON applications.job_id = jobs.id",
            "SELECT * FROM jobs, applications",
            "SELECT * FROM jobs j, users u",
            "SELECT * FROM information_schema.tables",
            "SELECT * FROM pg_catalog.pg_user",
            "SELECT * FROM pg_shadow",
            "SELECT * FROM other_schema.jobs",
            "SELECT id, job_id, candidate_name, contact FROM jobs UNION TABLE applications",
            "SELECT id, job_id, candidate_name, contact FROM jobs UNION ALL TABLE applications",
            "SELECT * FROM jobs UNION ALL TABLE ONLY public.applications",
            "SELECT * FROM jobs WHERE id IN (SELECT job_id FROM applications)",
            "SELECT * FROM \"Jobs\"",
            "SELECT 1",
        ] {
            assert_eq!(failed_check(sql), ValidationCheck::TableScope, "{}", sql);
        }
    }

    #[test]
    fn set_operations_are_scoped_like_any_other_query() {
        for sql in [
            "SELECT title FROM jobs UNION SELECT location FROM jobs",
            "SELECT id FROM jobs INTERSECT SELECT id FROM jobs WHERE salary > 0",
            "SELECT id FROM jobs EXCEPT SELECT id FROM jobs WHERE location = 'Pune'",
            "SELECT * FROM jobs UNION ALL TABLE jobs",
            "SELECT id FROM jobs UNION (SELECT id FROM public.jobs)",
        ] {
            let validated =
                check(sql).unwrap_or_else(|err| panic!("{} should be accepted: {}", sql, err));
            assert!(validated.sql().ends_with(" LIMIT 20"), "{}", validated.sql());
            assert_eq!(validated.row_bound(), 20);
        }

        for sql in [
            "SELECT id FROM jobs UNION SELECT id FROM applications",
            "SELECT id FROM jobs UNION ALL SELECT job_id FROM applications",
            "SELECT id FROM jobs INTERSECT TABLE applications",
            "SELECT id FROM jobs EXCEPT SELECT job_id FROM public.applications",
            "SELECT id FROM jobs UNION (SELECT id FROM users)",
            "SELECT usename FROM jobs UNION TABLE pg_catalog.pg_user",
        ] {
            assert_eq!(failed_check(sql), ValidationCheck::TableScope, "{}", sql);
        }
    }

    #[test]
    fn parentheses_must_balance() {
        for sql in [
            "SELECT * FROM jobs) AS q2 CROSS JOIN (SELECT * FROM jobs",
            "SELECT * FROM jobs (",
            "SELECT * FROM jobs WHERE (salary > 0",
            "SELECT count(*)) FROM jobs",
            "SELECT * FROM jobs LIMIT 5) AS q, (SELECT 1",
        ] {
            let failure = check(sql).expect_err("unbalanced statement must be rejected");
            assert_eq!(failure.check, ValidationCheck::SingleStatement, "{}", sql);
            assert_eq!(failure.message, "unbalanced parentheses");
        }

        check("SELECT * FROM jobs WHERE ((salary > 0) AND (location <> ')('))")
            .expect("parentheses inside literals are data");
    }

    #[test]
    fn nothing_but_a_literal_offset_may_follow_the_limit() {
        for sql in [
            "SELECT * FROM jobs LIMIT 5 + 100000",
            "SELECT * FROM jobs LIMIT 5 * 1000",
            "SELECT * FROM jobs LIMIT 5 || 0",
            "SELECT * FROM jobs LIMIT ALL * 2",
            "SELECT * FROM jobs LIMIT 2, 3 + 100",
            "SELECT * FROM jobs LIMIT 5 OFFSET 1 + 1",
            "SELECT * FROM jobs LIMIT 5 OFFSET 2 ROWS",
            "SELECT * FROM jobs LIMIT 5 UNION SELECT * FROM jobs",
        ] {
            assert_eq!(failed_check(sql), ValidationCheck::RowBound, "{}", sql);
        }

        for (sql, rendered, bound) in [
            ("SELECT * FROM jobs LIMIT 5 OFFSET 10", "SELECT * FROM jobs LIMIT 5 OFFSET 10", 5),
            ("SELECT * FROM jobs OFFSET 10 LIMIT 50", "SELECT * FROM jobs OFFSET 10 LIMIT 20", 20),
            ("SELECT * FROM jobs LIMIT ALL OFFSET 3", "SELECT * FROM jobs LIMIT 20 OFFSET 3", 20),
        ] {
            let validated = check(sql).expect("valid");
            assert_eq!(validated.sql(), rendered);
            assert_eq!(validated.row_bound(), bound);
        }
    }

    #[test]
    fn accepts_aliases_self_joins_and_qualified_names() {
        check("SELECT j.title FROM public.jobs AS j WHERE j.salary > 500000").expect("alias");
        check("SELECT a.title FROM jobs a JOIN jobs b ON a.location = b.location").expect("self join");
        check("SELECT \"jobs\".title FROM \"jobs\"").expect("quoted");
        check("SELECT * FROM (SELECT * FROM jobs WHERE salary > 0) AS rich").expect("subquery");
        check("SELECT EXTRACT(YEAR FROM now()) AS y, title FROM jobs").expect("extract");
        check("SELECT TRIM(BOTH ' ' FROM title) FROM jobs").expect("trim");
    }

    #[test]
    fn comments_cannot_hide_clauses_from_the_rendered_statement() {
        let validated = check("SELECT * FROM jobs -- LIMIT 5\n").expect("valid");
        assert_eq!(validated.sql(), "SELECT * FROM jobs LIMIT 20");

        let validated = check("SELECT * FROM jobs /* ; DROP TABLE jobs */ LIMIT 3").expect("valid");
        assert_eq!(validated.sql(), "SELECT * FROM jobs LIMIT 3");
    }

    #[test]
    fn rejects_what_the_lexer_cannot_track() {
        assert_eq!(
            failed_check("SELECT * FROM jobs WHERE title = E'\\'' ; DROP TABLE jobs; --'"),
            ValidationCheck::SingleStatement
        );
        assert_eq!(
            failed_check("SELECT * FROM jobs WHERE title = $$x$$"),
            ValidationCheck::SingleStatement
        );
    }

    #[test]
    fn fingerprint_is_sha256_of_rendered_sql() {
        let validated = check("SELECT id FROM jobs").expect("valid");
        assert_eq!(
            validated.fingerprint(),
            canonical::sha256_hex(b"SELECT id FROM jobs LIMIT 20")
        );
    }
}
