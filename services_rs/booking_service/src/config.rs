use crate::domain::DepositRate;
use regex::Regex;
use std::env;
use tourbook_common::secret_policy;

const MOMO_SANDBOX_API: &str = "https://test-payment.momo.vn/v2/gateway/api/create";
const VNPAY_SANDBOX_URL: &str = "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html";

#[derive(Clone, Debug)]
pub struct MomoSettings {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub api_url: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub request_type: String,
}

#[derive(Clone, Debug)]
pub struct VnpaySettings {
    pub tmn_code: String,
    pub hash_secret: String,
    pub pay_url: String,
    pub return_url: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub env_name: String,

    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,

    pub db_url: String,
    pub db_schema: Option<String>,

    pub require_internal_secret: bool,
    pub internal_secret: Option<String>,
    pub internal_allowed_callers: Vec<String>,

    pub allowed_origins: Vec<String>,

    pub deposit_rate: DepositRate,
    pub frontend_url: String,

    pub momo: Option<MomoSettings>,
    pub vnpay: Option<VnpaySettings>,
    pub gateway_timeout_secs: u64,

    pub mail_relay_url: Option<String>,
    pub mail_relay_secret: Option<String>,

    pub sweep_enabled: bool,
    pub sweep_hour_utc: u32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn normalize_db_url(raw: &str) -> String {
    // "postgresql+asyncpg://..." style URLs: drop the "+driver" part.
    if let Some(colon) = raw.find(':') {
        let (scheme, rest) = raw.split_at(colon);
        if let Some(plus) = scheme.find('+') {
            return format!("{}{}", &scheme[..plus], rest);
        }
    }
    raw.to_string()
}

fn validate_postgres_url(url: &str) -> Result<(), String> {
    let scheme = url
        .split_once(':')
        .map(|(s, _)| s.trim().to_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(()),
        _ => Err("BOOKING_DB_URL (or DB_URL) must be a postgres URL".to_string()),
    }
}

fn parse_bool_like(raw: &str) -> Option<bool> {
    let v = raw.trim().to_lowercase();
    if v.is_empty() {
        return None;
    }
    if matches!(v.as_str(), "0" | "false" | "no" | "off") {
        Some(false)
    } else {
        Some(true)
    }
}

fn require_http_url(key: &str, value: &str) -> Result<(), String> {
    let v = value.trim();
    if v.starts_with("https://") || v.starts_with("http://") {
        Ok(())
    } else {
        Err(format!("{key} must be an http(s) URL"))
    }
}

fn load_momo(env_name: &str) -> Result<Option<MomoSettings>, String> {
    let partner_code = env_opt("MOMO_PARTNER_CODE");
    let access_key = env_opt("MOMO_ACCESS_KEY");
    let secret_key = env_opt("MOMO_SECRET_KEY");
    secret_policy::credential_set_complete(
        "MoMo",
        &[
            ("MOMO_PARTNER_CODE", partner_code.as_deref()),
            ("MOMO_ACCESS_KEY", access_key.as_deref()),
            ("MOMO_SECRET_KEY", secret_key.as_deref()),
        ],
    )?;
    let (Some(partner_code), Some(access_key), Some(secret_key)) =
        (partner_code, access_key, secret_key)
    else {
        return Ok(None);
    };
    secret_policy::enforce_value_policy_for_env(
        env_name,
        "MOMO_SECRET_KEY",
        Some(secret_key.as_str()),
        true,
    )?;

    let api_url = env_or("MOMO_API", MOMO_SANDBOX_API);
    require_http_url("MOMO_API", &api_url)?;
    let redirect_url = env_opt("MOMO_REDIRECT_URL")
        .ok_or_else(|| "MOMO_REDIRECT_URL must be set when MoMo is configured".to_string())?;
    require_http_url("MOMO_REDIRECT_URL", &redirect_url)?;
    let ipn_url = env_opt("MOMO_IPN_URL")
        .ok_or_else(|| "MOMO_IPN_URL must be set when MoMo is configured".to_string())?;
    require_http_url("MOMO_IPN_URL", &ipn_url)?;

    let request_type = env_or("MOMO_REQUEST_TYPE", "captureWallet").trim().to_string();
    if !matches!(request_type.as_str(), "captureWallet" | "payWithATM") {
        return Err("MOMO_REQUEST_TYPE must be captureWallet or payWithATM".to_string());
    }

    Ok(Some(MomoSettings {
        partner_code,
        access_key,
        secret_key,
        api_url,
        redirect_url,
        ipn_url,
        request_type,
    }))
}

fn load_vnpay(env_name: &str) -> Result<Option<VnpaySettings>, String> {
    let tmn_code = env_opt("VNP_TMN_CODE");
    let hash_secret = env_opt("VNP_HASH_SECRET");
    secret_policy::credential_set_complete(
        "VNPay",
        &[
            ("VNP_TMN_CODE", tmn_code.as_deref()),
            ("VNP_HASH_SECRET", hash_secret.as_deref()),
        ],
    )?;
    let (Some(tmn_code), Some(hash_secret)) = (tmn_code, hash_secret) else {
        return Ok(None);
    };
    secret_policy::enforce_value_policy_for_env(
        env_name,
        "VNP_HASH_SECRET",
        Some(hash_secret.as_str()),
        true,
    )?;

    let pay_url = env_or("VNP_URL", VNPAY_SANDBOX_URL);
    require_http_url("VNP_URL", &pay_url)?;
    let return_url = env_opt("VNP_RETURN_URL")
        .ok_or_else(|| "VNP_RETURN_URL must be set when VNPay is configured".to_string())?;
    require_http_url("VNP_RETURN_URL", &return_url)?;

    Ok(Some(VnpaySettings {
        tmn_code,
        hash_secret,
        pay_url,
        return_url,
    }))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_name = env_or("ENV", "dev");
        let prod_like = secret_policy::is_production_like(&env_name);

        let host = env_or("APP_HOST", "0.0.0.0");
        let port: u16 = env_or("APP_PORT", "8085")
            .parse()
            .map_err(|_| "APP_PORT must be a valid u16".to_string())?;

        let db_raw = env_opt("BOOKING_DB_URL")
            .or_else(|| env_opt("DB_URL"))
            .unwrap_or_else(|| {
                "postgresql://tourbook:tourbook@db:5432/tourbook_booking".to_string()
            });
        let db_url = normalize_db_url(&db_raw);
        validate_postgres_url(&db_url)?;

        let db_schema = env_opt("DB_SCHEMA");
        if let Some(s) = &db_schema {
            let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| e.to_string())?;
            if !re.is_match(s) {
                return Err("DB_SCHEMA must match ^[A-Za-z_][A-Za-z0-9_]*$".to_string());
            }
        }

        let require_internal_secret = parse_bool_like(&env_or("BOOKING_REQUIRE_INTERNAL_SECRET", ""))
            .unwrap_or(prod_like);
        if prod_like && !require_internal_secret {
            return Err("BOOKING_REQUIRE_INTERNAL_SECRET must be true in prod/staging".to_string());
        }

        let internal_secret = env_opt("BOOKING_INTERNAL_SECRET");
        if require_internal_secret && internal_secret.is_none() {
            return Err(
                "BOOKING_INTERNAL_SECRET must be set when BOOKING_REQUIRE_INTERNAL_SECRET is enabled"
                    .to_string(),
            );
        }
        secret_policy::enforce_value_policy_for_env(
            &env_name,
            "BOOKING_INTERNAL_SECRET",
            internal_secret.as_deref(),
            false,
        )?;

        let mut internal_allowed_callers =
            parse_csv(&env_or("BOOKING_INTERNAL_ALLOWED_CALLERS", ""))
                .into_iter()
                .map(|v| v.to_ascii_lowercase())
                .collect::<Vec<_>>();
        if internal_allowed_callers.is_empty() && prod_like {
            internal_allowed_callers = vec!["bff".to_string()];
        }

        let mut allowed_origins = parse_csv(&env_or("ALLOWED_ORIGINS", ""));
        if allowed_origins.is_empty() {
            allowed_origins = vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ];
        }
        if prod_like && allowed_origins.iter().any(|o| o.trim() == "*") {
            return Err("ALLOWED_ORIGINS must not contain '*' in prod/staging".to_string());
        }
        if prod_like
            && allowed_origins
                .iter()
                .any(|o| !o.trim().starts_with("https://"))
        {
            return Err("ALLOWED_ORIGINS must use https:// origins in prod/staging".to_string());
        }

        let max_body_bytes: usize = env_or("BOOKING_MAX_BODY_BYTES", "1048576")
            .parse()
            .map_err(|_| "BOOKING_MAX_BODY_BYTES must be an integer".to_string())?;
        let max_body_bytes = max_body_bytes.clamp(16 * 1024, 10 * 1024 * 1024);

        let deposit_rate = match env_opt("BOOKING_DEPOSIT_RATE") {
            Some(raw) => {
                let rate: f64 = raw
                    .parse()
                    .map_err(|_| "BOOKING_DEPOSIT_RATE must be a number".to_string())?;
                DepositRate::new(rate).map_err(|e| format!("BOOKING_DEPOSIT_RATE: {e}"))?
            }
            None => DepositRate::default(),
        };

        let frontend_url = env_or("FRONTEND_URL", "http://localhost:5173")
            .trim()
            .trim_end_matches('/')
            .to_string();
        require_http_url("FRONTEND_URL", &frontend_url)?;

        let momo = load_momo(&env_name)?;
        let vnpay = load_vnpay(&env_name)?;

        let gateway_timeout_secs: u64 = env_or("GATEWAY_TIMEOUT_SECS", "15")
            .parse()
            .map_err(|_| "GATEWAY_TIMEOUT_SECS must be an integer".to_string())?;
        let gateway_timeout_secs = gateway_timeout_secs.clamp(1, 120);

        let mail_relay_url = env_opt("MAIL_RELAY_URL");
        if let Some(u) = &mail_relay_url {
            require_http_url("MAIL_RELAY_URL", u)?;
        }
        let mail_relay_secret = env_opt("MAIL_RELAY_SECRET");
        secret_policy::enforce_value_policy_for_env(
            &env_name,
            "MAIL_RELAY_SECRET",
            mail_relay_secret.as_deref(),
            mail_relay_url.is_some(),
        )?;

        let sweep_enabled = parse_bool_like(&env_or("SWEEP_ENABLED", "")).unwrap_or(true);
        let sweep_hour_utc: u32 = env_or("SWEEP_HOUR_UTC", "2")
            .parse()
            .map_err(|_| "SWEEP_HOUR_UTC must be an integer".to_string())?;
        if sweep_hour_utc > 23 {
            return Err("SWEEP_HOUR_UTC must be between 0 and 23".to_string());
        }

        Ok(Self {
            env_name,
            host,
            port,
            max_body_bytes,
            db_url,
            db_schema,
            require_internal_secret,
            internal_secret,
            internal_allowed_callers,
            allowed_origins,
            deposit_rate,
            frontend_url,
            momo,
            vnpay,
            gateway_timeout_secs,
            mail_relay_url,
            mail_relay_secret,
            sweep_enabled,
            sweep_hour_utc,
        })
    }
}
