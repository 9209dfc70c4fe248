//! VNPay bank-redirect gateway (API 2.1.0).
//!
//! Every parameter is prefixed `vnp_`. The signed string is the query string
//! built from the parameters sorted by key, with empty values dropped and keys
//! and values form-urlencoded (space as `+`). Amounts travel multiplied by 100.

use crate::digest::{digest_matches, hmac_sha512_hex};
use crate::{Result, SignatureError};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use url::form_urlencoded::byte_serialize;

pub const VERSION: &str = "2.1.0";
pub const RESPONSE_CODE_SUCCESS: &str = "00";
pub const SECURE_HASH: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";

/// VNPay amounts are the VND value multiplied by this factor.
pub const AMOUNT_SCALE: i64 = 100;

fn encode(raw: &str) -> String {
    byte_serialize(raw.as_bytes()).collect()
}

/// Sorted by key (the map already is), empty values skipped.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sign(query: &str, hash_secret: &str) -> String {
    hmac_sha512_hex(hash_secret, query)
}

/// Checks `vnp_SecureHash` against the remaining parameters. Both hash fields
/// are excluded from the signed string.
pub fn verify(params: &BTreeMap<String, String>, hash_secret: &str) -> bool {
    let Some(provided) = params.get(SECURE_HASH) else {
        return false;
    };
    let signed: BTreeMap<String, String> = params
        .iter()
        .filter(|(k, _)| k.as_str() != SECURE_HASH && k.as_str() != SECURE_HASH_TYPE)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let expected = sign(&canonical_query(&signed), hash_secret);
    digest_matches(&expected, provided)
}

#[derive(Debug, Clone)]
pub struct PayUrlParams {
    pub tmn_code: String,
    /// Amount in VND; scaled by [`AMOUNT_SCALE`] on the wire.
    pub amount: i64,
    pub txn_ref: String,
    pub order_info: String,
    pub order_type: String,
    pub return_url: String,
    pub ip_addr: String,
    pub locale: String,
    /// Local Vietnam time (GMT+7).
    pub create_date: NaiveDateTime,
    pub expire_date: Option<NaiveDateTime>,
}

impl PayUrlParams {
    pub fn to_params(&self) -> Result<BTreeMap<String, String>> {
        if self.amount <= 0 {
            return Err(SignatureError::InvalidAmount(self.amount.to_string()));
        }
        if self.txn_ref.trim().is_empty() {
            return Err(SignatureError::MissingField("vnp_TxnRef"));
        }
        let scaled = self
            .amount
            .checked_mul(AMOUNT_SCALE)
            .ok_or_else(|| SignatureError::InvalidAmount(self.amount.to_string()))?;
        let ip = if self.ip_addr.trim().is_empty() {
            "0.0.0.0"
        } else {
            self.ip_addr.trim()
        };

        let mut p = BTreeMap::new();
        p.insert("vnp_Version".to_string(), VERSION.to_string());
        p.insert("vnp_Command".to_string(), "pay".to_string());
        p.insert("vnp_TmnCode".to_string(), self.tmn_code.clone());
        p.insert("vnp_Locale".to_string(), self.locale.clone());
        p.insert("vnp_CurrCode".to_string(), "VND".to_string());
        p.insert("vnp_TxnRef".to_string(), self.txn_ref.clone());
        p.insert("vnp_OrderInfo".to_string(), self.order_info.clone());
        p.insert("vnp_OrderType".to_string(), self.order_type.clone());
        p.insert("vnp_Amount".to_string(), scaled.to_string());
        p.insert("vnp_ReturnUrl".to_string(), self.return_url.clone());
        p.insert("vnp_IpAddr".to_string(), ip.to_string());
        p.insert(
            "vnp_CreateDate".to_string(),
            self.create_date.format("%Y%m%d%H%M%S").to_string(),
        );
        if let Some(exp) = self.expire_date {
            p.insert(
                "vnp_ExpireDate".to_string(),
                exp.format("%Y%m%d%H%M%S").to_string(),
            );
        }
        Ok(p)
    }

    pub fn build_url(&self, pay_base_url: &str, hash_secret: &str) -> Result<String> {
        let base = pay_base_url.trim();
        if base.is_empty() {
            return Err(SignatureError::InvalidInput("pay url required"));
        }
        let qs = canonical_query(&self.to_params()?);
        let hash = sign(&qs, hash_secret);
        Ok(format!("{base}?{qs}&{SECURE_HASH}={hash}"))
    }
}

/// Fields the booking service needs from a return/IPN query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub txn_ref: String,
    pub response_code: String,
    pub transaction_no: Option<String>,
    pub transaction_status: Option<String>,
    /// Amount in VND, already divided by [`AMOUNT_SCALE`].
    pub amount: i64,
}

impl Callback {
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
        let get = |k: &str| {
            params
                .get(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let txn_ref = get("vnp_TxnRef").ok_or(SignatureError::MissingField("vnp_TxnRef"))?;
        let response_code =
            get("vnp_ResponseCode").ok_or(SignatureError::MissingField("vnp_ResponseCode"))?;
        let raw_amount = get("vnp_Amount").ok_or(SignatureError::MissingField("vnp_Amount"))?;
        let amount = descale_amount(&raw_amount)?;
        Ok(Self {
            txn_ref,
            response_code,
            transaction_no: get("vnp_TransactionNo"),
            transaction_status: get("vnp_TransactionStatus"),
            amount,
        })
    }

    pub fn is_success(&self) -> bool {
        self.response_code == RESPONSE_CODE_SUCCESS
            && self
                .transaction_status
                .as_deref()
                .map(|s| s == RESPONSE_CODE_SUCCESS)
                .unwrap_or(true)
    }

    /// VNPay transaction number; `"0"` means none was assigned.
    pub fn external_ref(&self) -> Option<String> {
        self.transaction_no
            .as_deref()
            .filter(|s| *s != "0")
            .map(str::to_string)
    }
}

/// Converts a wire amount (x100) back to VND. Fractional VND is rejected.
pub fn descale_amount(raw: &str) -> Result<i64> {
    let scaled: i64 = raw
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidAmount(raw.to_string()))?;
    if scaled < 0 || scaled % AMOUNT_SCALE != 0 {
        return Err(SignatureError::InvalidAmount(raw.to_string()));
    }
    Ok(scaled / AMOUNT_SCALE)
}
