//! Seed rules from a JSON file at startup.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ConfigError, DatabaseError};
use crate::rules::model::RuleDefinition;
use crate::store::Database;

/// A rules file holds either one rule or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum RulesFile {
    Many(Vec<RuleDefinition>),
    One(RuleDefinition),
}

/// Parse rule definitions from JSON text.
pub fn parse_rules(source: &str, origin: &str) -> Result<Vec<RuleDefinition>, ConfigError> {
    let parsed: RulesFile = serde_json::from_str(source).map_err(|e| ConfigError::RulesFile {
        path: origin.to_string(),
        reason: e.to_string(),
    })?;
    Ok(match parsed {
        RulesFile::Many(rules) => rules,
        RulesFile::One(rule) => vec![rule],
    })
}

/// Read and parse a rules file.
pub async fn load_rules_file(path: &Path) -> Result<Vec<RuleDefinition>, ConfigError> {
    let source = tokio::fs::read_to_string(path).await?;
    parse_rules(&source, &path.display().to_string())
}

/// Insert rules for `user_id`, skipping names the user already has.
/// Returns how many were inserted.
pub async fn seed_rules(
    db: &dyn Database,
    user_id: &str,
    rules: &[RuleDefinition],
) -> Result<usize, DatabaseError> {
    let mut inserted = 0;
    for rule in rules {
        if db.rule_exists(user_id, &rule.name).await? {
            debug!(rule = %rule.name, "Rule already exists, skipping");
            continue;
        }
        db.insert_rule(user_id, rule).await?;
        inserted += 1;
    }
    info!(inserted, total = rules.len(), "Seeded rules");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::SecretString;

    use super::*;
    use crate::store::LibSqlBackend;

    const RULES: &str = r#"[
        {
            "name": "Larger than 10p",
            "filters": [
                { "type": "amount", "test": "gt", "value": 10 },
                { "type": "direction", "direction": "in" }
            ],
            "macros": [
                {
                    "name": "Macro1",
                    "tasks": [
                        { "type": "balance", "pot": "current", "variable": "currentBalance" },
                        { "type": "notify", "title": "Test notification", "body": "Test body" }
                    ]
                }
            ]
        },
        { "name": "Empty" }
    ]"#;

    #[test]
    fn parses_list_and_single() {
        assert_eq!(parse_rules(RULES, "inline").unwrap().len(), 2);
        let one = parse_rules(r#"{ "name": "Solo" }"#, "inline").unwrap();
        assert_eq!(one[0].name, "Solo");
    }

    #[test]
    fn bad_json_names_the_file() {
        let err = parse_rules("{ nope", "rules.json").unwrap_err();
        assert!(err.to_string().contains("rules.json"));
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let user = db
            .upsert_user("a@b.c", &SecretString::from("tok"))
            .await
            .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();
        let rules = load_rules_file(file.path()).await.unwrap();

        assert_eq!(seed_rules(&db, &user.id, &rules).await.unwrap(), 2);
        assert_eq!(seed_rules(&db, &user.id, &rules).await.unwrap(), 0);
        assert_eq!(db.get_rules_for_user(&user.id).await.unwrap().len(), 2);
    }
}
