//! Input validation.
//!
//! Every string parameter passes through a fixed attack-signature gate
//! before any type-specific checks: a match short-circuits with
//! `blocked = true` and is never silently repaired. Inputs that pass the
//! gate are checked against per-type format rules, sanitized (trim,
//! length cap, unsafe character stripping), and may collect non-fatal
//! warnings (reserved names, well-known ports).

use std::collections::HashMap;
use std::net::IpAddr;

/// Hard cap applied to every input before type rules run.
const MAX_INPUT_LEN: usize = 1024;
const MAX_FREE_TEXT_LEN: usize = 255;

/// Attack signatures. Matching is case-insensitive substring search; the
/// goal is to reject attack-shaped input outright, not to parse it.
const SCRIPT_SIGNATURES: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "onerror=",
    "onload=",
    "<iframe",
    "<object",
    "<embed",
];

const SQL_SIGNATURES: &[&str] = &[
    "union select",
    "insert into",
    "delete from",
    "drop table",
    "drop database",
    "' or '1'='1",
    "or 1=1",
    "; --",
    "xp_cmdshell",
];

const SHELL_SIGNATURES: &[&str] = &[
    "$(", "`", "&&", "||", ";rm ", "; rm ", "|sh", "| sh", ">/dev/", "2>&1",
];

const TRAVERSAL_SIGNATURES: &[&str] = &["../", "..\\", "%2e%2e", "/etc/passwd", "c:\\windows"];

/// Usernames that are legal but suspicious on a shared device.
const RESERVED_USERNAMES: &[&str] = &["admin", "root", "administrator", "system", "operator"];

/// Input categories with dedicated format rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    Username,
    Password,
    IpAddress,
    Cidr,
    MacAddress,
    Port,
    TimeoutMs,
    CommandToken,
    FreeText,
    Numeric,
}

/// Outcome of validating a single input.
///
/// Exactly one of three shapes: blocked (attack signature matched, `value`
/// untouched), invalid (`errors` non-empty), or valid (possibly sanitized,
/// possibly with warnings).
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// The value after sanitization; the raw input when blocked or invalid.
    pub value: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// True when sanitization changed the input.
    pub sanitized: bool,
    /// True when an attack signature matched. Blocked input is reported,
    /// never repaired.
    pub blocked: bool,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        !self.blocked && self.errors.is_empty()
    }

    fn blocked(value: &str, signature: &str) -> Self {
        Self {
            value: value.to_string(),
            errors: vec![format!("matched attack signature '{signature}'")],
            warnings: Vec::new(),
            sanitized: false,
            blocked: true,
        }
    }
}

/// Aggregated result of [`InputValidator::validate_batch`].
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub ok: bool,
    pub blocked: bool,
    /// Field-qualified messages, e.g. `"username: too short"`.
    pub field_errors: Vec<String>,
    pub reports: HashMap<String, ValidationReport>,
}

/// Stateless validator for device-bound parameters.
///
/// The validator never talks to the device; it runs entirely in-process so
/// malformed and attack-shaped input is rejected before any queueing or
/// network involvement.
#[derive(Debug, Default, Clone)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validates one input against the attack gate and its type rules.
    ///
    /// # Arguments
    ///
    /// * `input` - the raw value as received from the caller
    /// * `input_type` - which rule set to apply after the gate
    pub fn validate(&self, input: &str, input_type: InputType) -> ValidationReport {
        if let Some(signature) = scan_attack_signatures(input) {
            return ValidationReport::blocked(input, signature);
        }

        if input.len() > MAX_INPUT_LEN {
            return ValidationReport {
                value: input.to_string(),
                errors: vec![format!("exceeds maximum input length of {MAX_INPUT_LEN}")],
                warnings: Vec::new(),
                sanitized: false,
                blocked: false,
            };
        }

        match input_type {
            InputType::Username => validate_username(input),
            InputType::Password => validate_password(input),
            InputType::IpAddress => validate_ip(input),
            InputType::Cidr => validate_cidr(input),
            InputType::MacAddress => validate_mac(input),
            InputType::Port => validate_port(input),
            InputType::TimeoutMs => validate_timeout(input),
            InputType::CommandToken => validate_command_token(input),
            InputType::FreeText => validate_free_text(input),
            InputType::Numeric => validate_numeric(input),
        }
    }

    /// Validates a whole named parameter set atomically.
    ///
    /// All fields are checked even after the first failure so the caller
    /// receives every problem in one pass. Any blocked field marks the whole
    /// batch as blocked.
    pub fn validate_batch(&self, fields: &[(&str, &str, InputType)]) -> BatchReport {
        let mut reports = HashMap::new();
        let mut field_errors = Vec::new();
        let mut blocked = false;

        for (name, input, input_type) in fields {
            let report = self.validate(input, *input_type);
            blocked |= report.blocked;
            for err in &report.errors {
                field_errors.push(format!("{name}: {err}"));
            }
            reports.insert(name.to_string(), report);
        }

        BatchReport {
            ok: field_errors.is_empty() && !blocked,
            blocked,
            field_errors,
            reports,
        }
    }
}

/// Returns the first matching attack signature, if any.
fn scan_attack_signatures(input: &str) -> Option<&'static str> {
    let lower = input.to_lowercase();
    SCRIPT_SIGNATURES
        .iter()
        .chain(SQL_SIGNATURES)
        .chain(SHELL_SIGNATURES)
        .chain(TRAVERSAL_SIGNATURES)
        .find(|sig| lower.contains(**sig))
        .copied()
}

fn valid_report(value: String, sanitized: bool, warnings: Vec<String>) -> ValidationReport {
    ValidationReport {
        value,
        errors: Vec::new(),
        warnings,
        sanitized,
        blocked: false,
    }
}

fn invalid_report(value: &str, error: String) -> ValidationReport {
    ValidationReport {
        value: value.to_string(),
        errors: vec![error],
        warnings: Vec::new(),
        sanitized: false,
        blocked: false,
    }
}

fn validate_username(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    let sanitized = trimmed != input;

    if trimmed.len() < 3 {
        return invalid_report(input, "username must be at least 3 characters".into());
    }
    if trimmed.len() > 32 {
        return invalid_report(input, "username must be at most 32 characters".into());
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
    {
        return invalid_report(
            input,
            "username may only contain letters, digits, '.', '_', '-' and '@'".into(),
        );
    }

    let mut warnings = Vec::new();
    if RESERVED_USERNAMES.contains(&trimmed.to_lowercase().as_str()) {
        warnings.push(format!("'{trimmed}' is a reserved name"));
    }

    valid_report(trimmed.to_string(), sanitized, warnings)
}

fn validate_password(input: &str) -> ValidationReport {
    if input.len() < 6 {
        return invalid_report(input, "password must be at least 6 characters".into());
    }
    if input.len() > 64 {
        return invalid_report(input, "password must be at most 64 characters".into());
    }
    if input.chars().any(|c| c.is_control()) {
        return invalid_report(input, "password must not contain control characters".into());
    }

    let mut warnings = Vec::new();
    let has_digit = input.chars().any(|c| c.is_ascii_digit());
    let has_alpha = input.chars().any(|c| c.is_ascii_alphabetic());
    if !(has_digit && has_alpha) {
        warnings.push("weak password: mix letters and digits".into());
    }

    valid_report(input.to_string(), false, warnings)
}

fn validate_ip(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(addr) => {
            let mut warnings = Vec::new();
            if addr.is_loopback() {
                warnings.push("loopback address".into());
            }
            valid_report(trimmed.to_string(), trimmed != input, warnings)
        }
        Err(_) => invalid_report(input, format!("'{trimmed}' is not a valid IP address")),
    }
}

fn validate_cidr(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    let Some((addr, prefix)) = trimmed.split_once('/') else {
        return invalid_report(input, "CIDR must be in address/prefix form".into());
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return invalid_report(input, format!("'{addr}' is not a valid IP address"));
    };
    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
    match prefix.parse::<u8>() {
        Ok(p) if p <= max_prefix => valid_report(trimmed.to_string(), trimmed != input, Vec::new()),
        _ => invalid_report(input, format!("prefix must be 0..={max_prefix}")),
    }
}

fn validate_mac(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    let parts: Vec<&str> = trimmed.split(|c| c == ':' || c == '-').collect();
    let well_formed = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));

    if well_formed {
        // Canonical form: colon-separated uppercase.
        let canonical = parts
            .iter()
            .map(|p| p.to_uppercase())
            .collect::<Vec<_>>()
            .join(":");
        let sanitized = canonical != input;
        valid_report(canonical, sanitized, Vec::new())
    } else {
        invalid_report(input, format!("'{trimmed}' is not a valid MAC address"))
    }
}

fn validate_port(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    match trimmed.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => {
            let mut warnings = Vec::new();
            if port < 1024 {
                warnings.push(format!("port {port} is in the well-known range"));
            }
            valid_report(trimmed.to_string(), trimmed != input, warnings)
        }
        _ => invalid_report(input, "port must be an integer in 1..=65535".into()),
    }
}

fn validate_timeout(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    match trimmed.parse::<u64>() {
        Ok(ms) if (1..=300_000).contains(&ms) => {
            valid_report(trimmed.to_string(), trimmed != input, Vec::new())
        }
        Ok(_) => invalid_report(input, "timeout must be between 1ms and 300000ms".into()),
        Err(_) => invalid_report(input, "timeout must be a number of milliseconds".into()),
    }
}

fn validate_command_token(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return invalid_report(input, "command token must start with '/'".into());
    }
    if trimmed.len() < 2 || trimmed.len() > 128 {
        return invalid_report(input, "command token length must be 2..=128".into());
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '/' | '-'))
    {
        return invalid_report(
            input,
            "command token may only contain lowercase letters, digits, '/' and '-'".into(),
        );
    }
    if trimmed.contains("//") {
        return invalid_report(input, "command token must not contain empty segments".into());
    }
    valid_report(trimmed.to_string(), trimmed != input, Vec::new())
}

fn validate_free_text(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    // Strip control characters; cap at the free-text limit.
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FREE_TEXT_LEN)
        .collect();
    let sanitized = cleaned != input;

    let mut warnings = Vec::new();
    if trimmed.chars().count() > MAX_FREE_TEXT_LEN {
        warnings.push(format!("text truncated to {MAX_FREE_TEXT_LEN} characters"));
    }

    valid_report(cleaned, sanitized, warnings)
}

fn validate_numeric(input: &str) -> ValidationReport {
    let trimmed = input.trim();
    match trimmed.parse::<i64>() {
        Ok(_) => valid_report(trimmed.to_string(), trimmed != input, Vec::new()),
        Err(_) => invalid_report(input, format!("'{trimmed}' is not a valid integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::new()
    }

    #[test]
    fn test_short_username_fails() {
        let report = validator().validate("ab", InputType::Username);
        assert!(!report.is_valid());
        assert!(!report.blocked);
        assert!(report.errors[0].contains("at least 3"));
    }

    #[test]
    fn test_valid_username_has_no_errors() {
        let report = validator().validate("alice.w-01", InputType::Username);
        assert!(report.is_valid());
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_reserved_username_warns_but_passes() {
        let report = validator().validate("admin", InputType::Username);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_username_bad_characters() {
        let report = validator().validate("alice bob", InputType::Username);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_script_injection_is_blocked_not_stripped() {
        let report = validator().validate("note <script>alert(1)</script>", InputType::FreeText);
        assert!(report.blocked);
        assert!(!report.is_valid());
        // Blocked input is reported verbatim, never repaired.
        assert_eq!(report.value, "note <script>alert(1)</script>");
        assert!(!report.sanitized);
    }

    #[test]
    fn test_sql_injection_blocked() {
        let report = validator().validate("x' OR 1=1; --", InputType::FreeText);
        assert!(report.blocked);
    }

    #[test]
    fn test_shell_metacharacters_blocked() {
        let report = validator().validate("name$(reboot)", InputType::Username);
        assert!(report.blocked);
    }

    #[test]
    fn test_path_traversal_blocked() {
        let report = validator().validate("../../etc/passwd", InputType::FreeText);
        assert!(report.blocked);
    }

    #[test]
    fn test_gate_runs_before_type_rules() {
        // Too short AND attack-shaped: the gate wins.
        let report = validator().validate("`x", InputType::Username);
        assert!(report.blocked);
    }

    #[test]
    fn test_password_rules() {
        assert!(!validator().validate("abc", InputType::Password).is_valid());
        let weak = validator().validate("abcdefgh", InputType::Password);
        assert!(weak.is_valid());
        assert_eq!(weak.warnings.len(), 1);
        let strong = validator().validate("abc123xyz", InputType::Password);
        assert!(strong.is_valid());
        assert!(strong.warnings.is_empty());
    }

    #[test]
    fn test_ip_validation() {
        assert!(validator().validate("192.168.88.1", InputType::IpAddress).is_valid());
        assert!(validator().validate("fe80::1", InputType::IpAddress).is_valid());
        assert!(!validator().validate("999.1.1.1", InputType::IpAddress).is_valid());
        let loopback = validator().validate("127.0.0.1", InputType::IpAddress);
        assert!(loopback.is_valid());
        assert_eq!(loopback.warnings.len(), 1);
    }

    #[test]
    fn test_cidr_validation() {
        assert!(validator().validate("10.0.0.0/24", InputType::Cidr).is_valid());
        assert!(!validator().validate("10.0.0.0/33", InputType::Cidr).is_valid());
        assert!(!validator().validate("10.0.0.0", InputType::Cidr).is_valid());
        assert!(validator().validate("fd00::/64", InputType::Cidr).is_valid());
    }

    #[test]
    fn test_mac_validation_and_canonical_form() {
        let report = validator().validate("aa-bb-cc-dd-ee-ff", InputType::MacAddress);
        assert!(report.is_valid());
        assert_eq!(report.value, "AA:BB:CC:DD:EE:FF");
        assert!(report.sanitized);
        assert!(!validator().validate("aa:bb:cc", InputType::MacAddress).is_valid());
    }

    #[test]
    fn test_port_validation() {
        assert!(validator().validate("8291", InputType::Port).is_valid());
        assert!(!validator().validate("0", InputType::Port).is_valid());
        assert!(!validator().validate("70000", InputType::Port).is_valid());
        let wellknown = validator().validate("22", InputType::Port);
        assert!(wellknown.is_valid());
        assert_eq!(wellknown.warnings.len(), 1);
    }

    #[test]
    fn test_timeout_validation() {
        assert!(validator().validate("5000", InputType::TimeoutMs).is_valid());
        assert!(!validator().validate("0", InputType::TimeoutMs).is_valid());
        assert!(!validator().validate("9999999", InputType::TimeoutMs).is_valid());
        assert!(!validator().validate("soon", InputType::TimeoutMs).is_valid());
    }

    #[test]
    fn test_command_token_validation() {
        assert!(validator().validate("/user/print", InputType::CommandToken).is_valid());
        assert!(validator().validate("/ip/hotspot/user/add", InputType::CommandToken).is_valid());
        assert!(!validator().validate("user/print", InputType::CommandToken).is_valid());
        assert!(!validator().validate("/user//print", InputType::CommandToken).is_valid());
        assert!(!validator().validate("/User/Print", InputType::CommandToken).is_valid());
    }

    #[test]
    fn test_free_text_sanitization() {
        let report = validator().validate("  hello\u{0007} world  ", InputType::FreeText);
        assert!(report.is_valid());
        assert_eq!(report.value, "hello world");
        assert!(report.sanitized);
    }

    #[test]
    fn test_free_text_length_cap() {
        let long = "a".repeat(400);
        let report = validator().validate(&long, InputType::FreeText);
        assert!(report.is_valid());
        assert_eq!(report.value.len(), 255);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_numeric_validation() {
        assert!(validator().validate("-42", InputType::Numeric).is_valid());
        assert!(!validator().validate("4.2", InputType::Numeric).is_valid());
    }

    #[test]
    fn test_oversized_input_rejected() {
        let huge = "a".repeat(MAX_INPUT_LEN + 1);
        let report = validator().validate(&huge, InputType::FreeText);
        assert!(!report.is_valid());
        assert!(!report.blocked);
    }

    #[test]
    fn test_validate_batch_aggregates_field_errors() {
        let batch = validator().validate_batch(&[
            ("username", "ab", InputType::Username),
            ("password", "longenough1", InputType::Password),
            ("address", "not-an-ip", InputType::IpAddress),
        ]);
        assert!(!batch.ok);
        assert!(!batch.blocked);
        assert_eq!(batch.field_errors.len(), 2);
        assert!(batch.field_errors.iter().any(|e| e.starts_with("username:")));
        assert!(batch.field_errors.iter().any(|e| e.starts_with("address:")));
        assert!(batch.reports["password"].is_valid());
    }

    #[test]
    fn test_validate_batch_blocked_field_blocks_batch() {
        let batch = validator().validate_batch(&[
            ("username", "alice", InputType::Username),
            ("comment", "<script>x</script>", InputType::FreeText),
        ]);
        assert!(!batch.ok);
        assert!(batch.blocked);
    }

    #[test]
    fn test_validate_batch_all_valid() {
        let batch = validator().validate_batch(&[
            ("username", "alice", InputType::Username),
            ("port", "8728", InputType::Port),
        ]);
        assert!(batch.ok);
        assert!(batch.field_errors.is_empty());
    }
}
