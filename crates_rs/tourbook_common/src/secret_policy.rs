pub fn is_production_like(env_name: &str) -> bool {
    let env = env_name.trim().to_ascii_lowercase();
    matches!(env.as_str(), "prod" | "production" | "staging")
}

pub fn enforce_value_policy_for_env(
    env_name: &str,
    key: &str,
    value: Option<&str>,
    required_in_prod: bool,
) -> Result<(), String> {
    if !is_production_like(env_name) {
        return Ok(());
    }

    let secret = value.map(str::trim).unwrap_or("");
    if secret.is_empty() {
        if required_in_prod {
            return Err(format!("{key} must be set in prod/staging"));
        }
        return Ok(());
    }

    if secret.len() < 16 {
        return Err(format!(
            "{key} must be at least 16 characters in prod/staging"
        ));
    }
    if looks_like_placeholder(secret) {
        return Err(format!(
            "{key} looks like a placeholder/default value; use a strong random secret"
        ));
    }
    Ok(())
}

/// Gateway credentials come in sets (e.g. partner code + access key + secret
/// key). A partially configured set is always a deployment mistake, so it is
/// rejected in every environment. Returns whether the set is configured.
pub fn credential_set_complete(set_name: &str, entries: &[(&str, Option<&str>)]) -> Result<bool, String> {
    let present: Vec<&str> = entries
        .iter()
        .filter(|(_, v)| v.map(str::trim).is_some_and(|s| !s.is_empty()))
        .map(|(k, _)| *k)
        .collect();
    if present.is_empty() {
        return Ok(false);
    }
    if present.len() == entries.len() {
        return Ok(true);
    }
    let missing = entries
        .iter()
        .map(|(k, _)| *k)
        .filter(|k| !present.contains(k))
        .collect::<Vec<_>>()
        .join(", ");
    Err(format!("{set_name} is partially configured; missing {missing}"))
}

fn looks_like_placeholder(secret: &str) -> bool {
    let s = secret.trim().to_ascii_lowercase();
    let banned_exact = [
        "change-me",
        "changeme",
        "replace-me",
        "secret",
        "password",
        "devsecret",
        "default",
        "dummy",
        "example",
        "test",
    ];
    if banned_exact.iter().any(|v| *v == s) {
        return true;
    }

    let banned_fragments = [
        "change-me",
        "change_me",
        "replace-me",
        "replace_me",
        "set-me",
        "your-secret",
        "your_secret",
        "dev-secret",
        "dev_secret",
        "sandbox-key",
    ];
    banned_fragments.iter().any(|v| s.contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_prod_skips_validation() {
        let res = enforce_value_policy_for_env("dev", "MOMO_SECRET_KEY", Some("short"), true);
        assert!(res.is_ok());
    }

    #[test]
    fn prod_rejects_short_secret() {
        let res = enforce_value_policy_for_env("prod", "MOMO_SECRET_KEY", Some("short"), true);
        assert!(res.is_err());
    }

    #[test]
    fn prod_rejects_missing_required_secret() {
        let res = enforce_value_policy_for_env("staging", "BOOKING_INTERNAL_SECRET", None, true);
        assert_eq!(
            res.unwrap_err(),
            "BOOKING_INTERNAL_SECRET must be set in prod/staging"
        );
    }

    #[test]
    fn prod_rejects_placeholder_like_secret() {
        let res = enforce_value_policy_for_env(
            "prod",
            "VNP_HASH_SECRET",
            Some("change-me-super-secret-value"),
            true,
        );
        assert!(res.is_err());
    }

    #[test]
    fn prod_accepts_strong_secret() {
        let res = enforce_value_policy_for_env(
            "prod",
            "VNP_HASH_SECRET",
            Some("p9s7Qk_4w-vN2xT8kP6m"),
            true,
        );
        assert!(res.is_ok());
    }

    #[test]
    fn credential_sets_are_all_or_nothing() {
        assert_eq!(
            credential_set_complete("MoMo", &[("A", None), ("B", Some("  "))]),
            Ok(false)
        );
        assert_eq!(
            credential_set_complete("MoMo", &[("A", Some("x")), ("B", Some("y"))]),
            Ok(true)
        );
        let err = credential_set_complete("MoMo", &[("A", Some("x")), ("B", None), ("C", None)])
            .unwrap_err();
        assert_eq!(err, "MoMo is partially configured; missing B, C");
    }
}
