//! MoMo wallet gateway (API v2).
//!
//! MoMo signs a `key=value&key=value` string whose key order is fixed by its
//! documentation. Every documented key is always present in that string; a
//! field the payload does not carry is rendered as `key=` (empty value).

use crate::digest::{digest_matches, hmac_sha256_hex};
use crate::{Result, SignatureError};
use serde::{Deserialize, Deserializer, Serialize};

pub const RESULT_CODE_SUCCESS: i64 = 0;

/// Joins the pairs in the given order, keeping empty values as `key=`.
pub fn canonical_string(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sign(raw: &str, secret_key: &str) -> String {
    hmac_sha256_hex(secret_key, raw)
}

#[derive(Debug, Clone)]
pub struct MomoCredentials {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Unsigned "create payment" request. `amount` is in VND (no scaling).
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub request_id: String,
    pub order_id: String,
    pub amount: i64,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub request_type: String,
    pub extra_data: String,
    pub lang: String,
}

/// Wire body of `POST /v2/gateway/api/create`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    pub partner_code: String,
    pub access_key: String,
    pub request_id: String,
    pub amount: String,
    pub order_id: String,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub extra_data: String,
    pub request_type: String,
    pub signature: String,
    pub lang: String,
}

impl CreatePaymentRequest {
    pub fn raw_signature(&self, creds: &MomoCredentials) -> String {
        let amount = self.amount.to_string();
        canonical_string(&[
            ("accessKey", creds.access_key.as_str()),
            ("amount", amount.as_str()),
            ("extraData", self.extra_data.as_str()),
            ("ipnUrl", self.ipn_url.as_str()),
            ("orderId", self.order_id.as_str()),
            ("orderInfo", self.order_info.as_str()),
            ("partnerCode", creds.partner_code.as_str()),
            ("redirectUrl", self.redirect_url.as_str()),
            ("requestId", self.request_id.as_str()),
            ("requestType", self.request_type.as_str()),
        ])
    }

    pub fn into_signed_body(self, creds: &MomoCredentials) -> Result<CreatePaymentBody> {
        if self.amount <= 0 {
            return Err(SignatureError::InvalidAmount(self.amount.to_string()));
        }
        if self.order_id.trim().is_empty() {
            return Err(SignatureError::MissingField("orderId"));
        }
        if self.request_id.trim().is_empty() {
            return Err(SignatureError::MissingField("requestId"));
        }
        let signature = sign(&self.raw_signature(creds), &creds.secret_key);
        Ok(CreatePaymentBody {
            partner_code: creds.partner_code.clone(),
            access_key: creds.access_key.clone(),
            request_id: self.request_id,
            amount: self.amount.to_string(),
            order_id: self.order_id,
            order_info: self.order_info,
            redirect_url: self.redirect_url,
            ipn_url: self.ipn_url,
            extra_data: self.extra_data,
            request_type: self.request_type,
            signature,
            lang: self.lang,
        })
    }
}

/// Response of the create endpoint. MoMo omits fields freely on failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreatePaymentResponse {
    #[serde(deserialize_with = "lenient_i64")]
    pub result_code: Option<i64>,
    pub message: Option<String>,
    pub pay_url: Option<String>,
    pub deeplink: Option<String>,
    pub qr_code_url: Option<String>,
}

impl CreatePaymentResponse {
    pub fn is_success(&self) -> bool {
        self.result_code == Some(RESULT_CODE_SUCCESS)
    }
}

/// Return-redirect query or IPN body. The IPN posts JSON numbers for
/// `amount`, `transId`, `resultCode` and `responseTime`, while the return
/// redirect carries the same fields as query strings, so every field is read
/// as a string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Callback {
    #[serde(deserialize_with = "lenient_string")]
    pub partner_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub order_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub request_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub amount: String,
    #[serde(deserialize_with = "lenient_string")]
    pub order_info: String,
    #[serde(deserialize_with = "lenient_string")]
    pub order_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub trans_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub result_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub message: String,
    #[serde(deserialize_with = "lenient_string")]
    pub pay_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub response_time: String,
    #[serde(deserialize_with = "lenient_string")]
    pub extra_data: String,
    #[serde(deserialize_with = "lenient_string")]
    pub signature: String,
}

impl Callback {
    /// `accessKey` is not echoed by MoMo in callbacks; it comes from the
    /// merchant credentials.
    pub fn raw_signature(&self, access_key: &str) -> String {
        canonical_string(&[
            ("accessKey", access_key),
            ("amount", self.amount.as_str()),
            ("extraData", self.extra_data.as_str()),
            ("message", self.message.as_str()),
            ("orderId", self.order_id.as_str()),
            ("orderInfo", self.order_info.as_str()),
            ("orderType", self.order_type.as_str()),
            ("partnerCode", self.partner_code.as_str()),
            ("payType", self.pay_type.as_str()),
            ("requestId", self.request_id.as_str()),
            ("responseTime", self.response_time.as_str()),
            ("resultCode", self.result_code.as_str()),
            ("transId", self.trans_id.as_str()),
        ])
    }

    pub fn verify(&self, creds: &MomoCredentials) -> bool {
        let expected = sign(&self.raw_signature(&creds.access_key), &creds.secret_key);
        digest_matches(&expected, &self.signature)
    }

    pub fn is_success(&self) -> bool {
        self.result_code.trim().parse::<i64>().ok() == Some(RESULT_CODE_SUCCESS)
    }

    /// Paid amount in VND.
    pub fn amount_vnd(&self) -> Result<i64> {
        let raw = self.amount.trim();
        match raw.parse::<i64>() {
            Ok(v) if v >= 0 => Ok(v),
            _ => Err(SignatureError::InvalidAmount(raw.to_string())),
        }
    }

    /// Gateway transaction id, falling back to the request id when MoMo did
    /// not assign one.
    pub fn external_ref(&self) -> Option<String> {
        [self.trans_id.trim(), self.request_id.trim()]
            .into_iter()
            .find(|s| !s.is_empty() && *s != "0")
            .map(str::to_string)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(v) => v.to_string(),
            Self::UInt(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<StringOrNumber>::deserialize(deserializer)?;
    Ok(v.map(StringOrNumber::into_string).unwrap_or_default())
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<StringOrNumber>::deserialize(deserializer)?;
    Ok(v.and_then(|v| v.into_string().trim().parse::<i64>().ok()))
}
