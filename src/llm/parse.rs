use crate::error::{CourtError, Result};
use crate::judgment::{SuspectDraft, MAX_SUSPECTS};
use crate::util::truncate;
use serde::{Deserialize, Serialize};

/// Sentences per intensity in a blame message list
pub const MESSAGES_PER_INTENSITY: usize = 3;
const PREVIEW_CHARS: usize = 200;

/// Strip markdown code fences from a response.
///
/// Only the wrapping is removed; broken JSON inside is left for the validator
/// to reject.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string (```json, ```JSON, ``` json ...) up to the first newline.
    let body = match rest.find('\n') {
        Some(newline) if is_info_string(&rest[..newline]) => &rest[newline + 1..],
        Some(_) => rest,
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn is_info_string(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ═══════════════════════════════════════════════════════════════════════════
//  SCHEMAS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct SuspectListJson {
    suspects: Vec<SuspectJson>,
}

#[derive(Deserialize)]
struct SuspectJson {
    username: String,
    responsibility: i64,
    reason: String,
}

/// Validate an analysis response: `{"suspects":[...]}` with 1..=5 entries,
/// each naming a non-empty username with an integer responsibility in 0..=100.
///
/// Model order is preserved. The responsibility sum is not checked here.
pub fn parse_suspects(response: &str) -> Result<Vec<SuspectDraft>> {
    let json = strip_markdown_fences(response);
    let parsed: SuspectListJson = serde_json::from_str(json).map_err(|e| {
        CourtError::MalformedResponse(format!(
            "suspect list did not match schema ({}). Response preview: {}",
            e,
            truncate(json, PREVIEW_CHARS)
        ))
    })?;

    let count = parsed.suspects.len();
    if count == 0 || count > MAX_SUSPECTS {
        return Err(CourtError::MalformedResponse(format!(
            "expected between 1 and {} suspects, got {}",
            MAX_SUSPECTS, count
        )));
    }

    parsed
        .suspects
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let username = s.username.trim();
            if username.is_empty() {
                return Err(CourtError::MalformedResponse(format!(
                    "suspect #{} has an empty username",
                    i + 1
                )));
            }
            let responsibility = u8::try_from(s.responsibility)
                .ok()
                .filter(|r| *r <= 100)
                .ok_or_else(|| {
                    CourtError::MalformedResponse(format!(
                        "suspect '{}' has responsibility {} outside 0..=100",
                        username, s.responsibility
                    ))
                })?;
            Ok(SuspectDraft::new(username, responsibility, s.reason.trim()))
        })
        .collect()
}

/// Validate a message response: a JSON array of exactly three non-empty strings.
pub fn parse_messages(response: &str) -> Result<Vec<String>> {
    let json = strip_markdown_fences(response);
    let parsed: Vec<String> = serde_json::from_str(json).map_err(|e| {
        CourtError::MalformedResponse(format!(
            "message list did not match schema ({}). Response preview: {}",
            e,
            truncate(json, PREVIEW_CHARS)
        ))
    })?;

    if parsed.len() != MESSAGES_PER_INTENSITY {
        return Err(CourtError::MalformedResponse(format!(
            "expected exactly {} messages, got {}",
            MESSAGES_PER_INTENSITY,
            parsed.len()
        )));
    }

    parsed
        .into_iter()
        .map(|m| {
            let m = m.trim().to_string();
            if m.is_empty() {
                Err(CourtError::MalformedResponse("empty message sentence".into()))
            } else {
                Ok(m)
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
//  RESPONSIBILITY SUM
// ═══════════════════════════════════════════════════════════════════════════

/// What to do when the model's responsibilities don't add up to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SumPolicy {
    /// Accept the model's numbers as-is (logged)
    #[default]
    Trust,
    /// Rescale proportionally so the set sums to exactly 100
    Normalize,
    /// Treat the deviation as a malformed response (retried)
    Reject,
}

impl std::str::FromStr for SumPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trust" => Ok(SumPolicy::Trust),
            "normalize" => Ok(SumPolicy::Normalize),
            "reject" => Ok(SumPolicy::Reject),
            other => Err(format!("unknown sum policy '{}'", other)),
        }
    }
}

pub fn responsibility_sum(suspects: &[SuspectDraft]) -> u32 {
    suspects.iter().map(|s| u32::from(s.responsibility)).sum()
}

/// Apply `policy` to a validated suspect list.
pub fn apply_sum_policy(
    mut suspects: Vec<SuspectDraft>,
    policy: SumPolicy,
) -> Result<Vec<SuspectDraft>> {
    let total = responsibility_sum(&suspects);
    if total == 100 {
        return Ok(suspects);
    }

    match policy {
        SumPolicy::Trust => {
            tracing::warn!(total, "model responsibilities do not sum to 100; keeping as-is");
            Ok(suspects)
        }
        SumPolicy::Reject => Err(CourtError::MalformedResponse(format!(
            "responsibilities sum to {}, expected 100",
            total
        ))),
        SumPolicy::Normalize => {
            let shares = normalize_to_100(
                &suspects
                    .iter()
                    .map(|s| u32::from(s.responsibility))
                    .collect::<Vec<_>>(),
            );
            tracing::debug!(total, ?shares, "normalized responsibilities");
            for (suspect, share) in suspects.iter_mut().zip(shares) {
                suspect.responsibility = share;
            }
            Ok(suspects)
        }
    }
}

/// Largest-remainder rescale of `weights` to integers summing to 100.
/// Ties on remainder go to the earlier entry; an all-zero input splits evenly.
fn normalize_to_100(weights: &[u32]) -> Vec<u8> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total: u32 = weights.iter().sum();
    let weights: Vec<u32> = if total == 0 {
        vec![1; weights.len()]
    } else {
        weights.to_vec()
    };
    let total: u32 = weights.iter().sum();

    let mut shares: Vec<u32> = weights.iter().map(|w| w * 100 / total).collect();
    let mut remainders: Vec<(usize, u32)> = weights
        .iter()
        .enumerate()
        .map(|(i, w)| (i, w * 100 % total))
        .collect();
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let missing = 100 - shares.iter().sum::<u32>();
    for (i, _) in remainders.into_iter().take(missing as usize) {
        shares[i] += 1;
    }
    shares.into_iter().map(|s| s as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUSPECTS_JSON: &str = r#"{"suspects":[{"username":"bob","responsibility":70,"reason":"Last modified total()"},{"username":"alice","responsibility":30,"reason":"Reviewed it"}]}"#;

    #[test]
    fn test_strip_fences_json_info_string() {
        let fenced = format!("```json\n{}\n```", SUSPECTS_JSON);
        assert_eq!(strip_markdown_fences(&fenced), SUSPECTS_JSON);
    }

    #[test]
    fn test_strip_fences_plain_and_unfenced() {
        let fenced = format!("  ```\n{}\n```  \n", SUSPECTS_JSON);
        assert_eq!(strip_markdown_fences(&fenced), SUSPECTS_JSON);
        assert_eq!(strip_markdown_fences(&format!("\n {} \n", SUSPECTS_JSON)), SUSPECTS_JSON);
    }

    #[test]
    fn test_strip_fences_single_line() {
        assert_eq!(strip_markdown_fences("```json[\"a\"]```"), "[\"a\"]");
    }

    #[test]
    fn test_fenced_and_unfenced_parse_identically() {
        let fenced = format!("```json\n{}\n```", SUSPECTS_JSON);
        assert_eq!(
            parse_suspects(&fenced).unwrap(),
            parse_suspects(SUSPECTS_JSON).unwrap()
        );
    }

    #[test]
    fn test_parse_suspects_keeps_model_order() {
        let suspects = parse_suspects(SUSPECTS_JSON).unwrap();
        assert_eq!(suspects.len(), 2);
        assert_eq!(suspects[0].username, "bob");
        assert_eq!(suspects[0].responsibility, 70);
        assert_eq!(suspects[1].username, "alice");
    }

    #[test]
    fn test_parse_suspects_rejects_empty_and_oversized_lists() {
        assert!(matches!(
            parse_suspects(r#"{"suspects":[]}"#),
            Err(CourtError::MalformedResponse(_))
        ));

        let six: Vec<String> = (0..6)
            .map(|i| format!(r#"{{"username":"u{i}","responsibility":10,"reason":"r"}}"#))
            .collect();
        let json = format!(r#"{{"suspects":[{}]}}"#, six.join(","));
        assert!(matches!(
            parse_suspects(&json),
            Err(CourtError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_suspects_rejects_bad_fields() {
        for bad in [
            r#"{"suspects":[{"username":"","responsibility":10,"reason":"r"}]}"#,
            r#"{"suspects":[{"username":"a","responsibility":101,"reason":"r"}]}"#,
            r#"{"suspects":[{"username":"a","responsibility":-1,"reason":"r"}]}"#,
            r#"{"suspects":[{"username":"a","responsibility":52.5,"reason":"r"}]}"#,
            r#"{"suspects":[{"username":"a","responsibility":"50","reason":"r"}]}"#,
            r#"{"suspects":[{"username":"a","responsibility":50}]}"#,
            r#"{"culprits":[]}"#,
            r#"Sure! Here is the analysis you asked for."#,
        ] {
            assert!(
                matches!(parse_suspects(bad), Err(CourtError::MalformedResponse(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_parse_messages_exactly_three() {
        let messages =
            parse_messages("```json\n[\"Hey bob.\", \"Totals broke.\", \"Fix it please 🙏\"]\n```")
                .unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], "Fix it please 🙏");

        assert!(parse_messages(r#"["one", "two"]"#).is_err());
        assert!(parse_messages(r#"["one", "two", "three", "four"]"#).is_err());
        assert!(parse_messages(r#"["one", "  ", "three"]"#).is_err());
        assert!(parse_messages(r#"{"messages":["a","b","c"]}"#).is_err());
    }

    #[test]
    fn test_sum_policy_trust_keeps_numbers() {
        let suspects = vec![SuspectDraft::new("a", 50, "r"), SuspectDraft::new("b", 20, "r")];
        let kept = apply_sum_policy(suspects.clone(), SumPolicy::Trust).unwrap();
        assert_eq!(kept, suspects);
    }

    #[test]
    fn test_sum_policy_reject() {
        let suspects = vec![SuspectDraft::new("a", 50, "r"), SuspectDraft::new("b", 20, "r")];
        assert!(matches!(
            apply_sum_policy(suspects, SumPolicy::Reject),
            Err(CourtError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_sum_policy_normalize_sums_to_100() {
        let suspects = vec![
            SuspectDraft::new("a", 50, "r"),
            SuspectDraft::new("b", 20, "r"),
            SuspectDraft::new("c", 20, "r"),
        ];
        let normalized = apply_sum_policy(suspects, SumPolicy::Normalize).unwrap();
        assert_eq!(responsibility_sum(&normalized), 100);
        assert_eq!(normalized[0].responsibility, 56);
        assert_eq!(normalized[1].responsibility, 22);
        assert_eq!(normalized[2].responsibility, 22);
    }

    #[test]
    fn test_normalize_handles_all_zero_and_thirds() {
        assert_eq!(normalize_to_100(&[0, 0, 0]), vec![34, 33, 33]);
        assert_eq!(normalize_to_100(&[1, 1, 1]), vec![34, 33, 33]);
        assert_eq!(normalize_to_100(&[100]), vec![100]);
    }
}
