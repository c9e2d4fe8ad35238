/// Maximum length for upstream error bodies embedded in errors and logs
pub const MAX_ERROR_BODY_CHARS: usize = 200;

/// Truncate to `max` characters, marking the cut with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Shorten an upstream error body and drop it entirely if it looks like it
/// echoes a credential back.
pub fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "api_key",
        "x-api-key",
        "ghp_",
        "gho_",
        "github_pat_",
        "sk-",
    ];

    let lower = body.to_lowercase();
    if SECRET_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return "(error details redacted - may contain sensitive data)".to_string();
    }

    truncate(body.trim(), MAX_ERROR_BODY_CHARS)
}
