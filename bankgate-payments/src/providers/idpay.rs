//! IDPay gateway

use super::{ProviderContext, check_amount, endpoint, text};
use crate::currency::Currency;
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{
    BankProvider, CallbackOutcome, CallbackPayload, Initiation, PaymentRequest, Verification,
    VerifyRequest,
};
use crate::record::{BankType, IdPayExtension, ProviderExtension};
use crate::resolver::Credentials;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

/// Production API host
pub const DEFAULT_API_URL: &str = "https://api.idpay.ir";
/// Production payment page host
pub const DEFAULT_PAYMENT_URL: &str = "https://idpay.ir";

/// Callback `status` meaning the user paid and the payment awaits verification
const STATUS_AWAITING_VERIFY: i64 = 10;
/// Verified now, or verified by an earlier call
const VERIFIED: [i64; 2] = [100, 101];

/// IDPay provider.
///
/// Credentials: `MERCHANT_CODE` (API key), optional `SANDBOX` flag, and
/// optional `API_URL` / `PAYMENT_URL` host overrides.
pub struct IdPayProvider {
    api_key: SecretString,
    sandbox: bool,
    api_url: String,
    payment_url: String,
    context: ProviderContext,
}

impl IdPayProvider {
    pub fn new(credentials: &Credentials, context: ProviderContext) -> PaymentResult<Self> {
        Ok(Self {
            api_key: SecretString::from(credentials.require("MERCHANT_CODE")?.to_string()),
            sandbox: credentials.flag("SANDBOX"),
            api_url: endpoint(credentials, "API_URL", DEFAULT_API_URL),
            payment_url: endpoint(credentials, "PAYMENT_URL", DEFAULT_PAYMENT_URL),
            context,
        })
    }

    pub fn is_sandbox(&self) -> bool {
        self.sandbox
    }

    async fn send(&self, path: &str, body: &Value) -> PaymentResult<Value> {
        let headers = [
            ("X-API-KEY", self.api_key.expose_secret().to_string()),
            ("X-SANDBOX", if self.sandbox { "1" } else { "0" }.to_string()),
        ];
        self.context
            .transport
            .post_json(
                &format!("{}{}", self.api_url, path),
                body,
                &headers,
                self.context.timeout,
            )
            .await
    }
}

fn status_code(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[async_trait]
impl BankProvider for IdPayProvider {
    fn bank_type(&self) -> BankType {
        BankType::IdPay
    }

    fn gateway_currency(&self) -> Currency {
        Currency::Irr
    }

    async fn initiate(&self, request: &PaymentRequest) -> PaymentResult<Initiation> {
        let body = json!({
            "order_id": request.tracking_code,
            "amount": request.amount,
            "phone": request.phone,
            "callback": request.callback_url,
        });
        let response = self.send("/v1.1/payment", &body).await?;

        if !response["error_code"].is_null() {
            let reason = text(&response["error_message"])
                .unwrap_or_else(|| format!("error code {}", response["error_code"]));
            return Err(PaymentError::PaymentRejected(reason));
        }

        let id = text(&response["id"]).ok_or_else(|| {
            PaymentError::PaymentRejected("IDPay returned no payment id".to_string())
        })?;
        Ok(Initiation {
            reference_number: id,
            response_text: text(&response["link"]),
        })
    }

    fn payment_url(&self, reference_number: &str) -> PaymentResult<Url> {
        let page = if self.sandbox { "ws-sandbox" } else { "ws" };
        let base = Url::parse(&format!("{}/p/{}/", self.payment_url, page))?;
        Ok(base.join(reference_number)?)
    }

    fn map_callback(&self, payload: &CallbackPayload) -> PaymentResult<CallbackOutcome> {
        let tracking_code = payload.require("order_id")?.to_string();
        let status = payload.get("status").and_then(|s| s.trim().parse::<i64>().ok());

        debug!(tracking_code = %tracking_code, status = ?status, "IDPay callback");

        Ok(CallbackOutcome {
            tracking_code,
            approved: status == Some(STATUS_AWAITING_VERIFY),
            extension: ProviderExtension::IdPay(IdPayExtension {
                id: payload.get("id").map(str::to_string),
                track_id: payload.get("track_id").map(str::to_string),
                card_no: payload.get("card_no").map(str::to_string),
                hashed_card_no: payload.get("hashed_card_no").map(str::to_string),
            }),
            response_text: payload.get("status").map(|s| format!("status {}", s)),
        })
    }

    async fn verify_with_provider(&self, request: &VerifyRequest<'_>) -> PaymentResult<Verification> {
        let record = request.record;
        let id = record.reference_number.as_deref().ok_or_else(|| {
            PaymentError::RecordNotFound(format!("{} has no IDPay id", record.tracking_code))
        })?;

        if let Some(echoed) = record.extension.idpay().and_then(|ext| ext.id.as_deref())
            && echoed != id
        {
            warn!(
                tracking_code = %record.tracking_code,
                expected = id,
                echoed,
                "IDPay callback id does not match the payment"
            );
            return Err(PaymentError::InvalidCallback(format!(
                "IDPay id {} does not belong to {}",
                echoed, record.tracking_code
            )));
        }

        let body = json!({
            "id": id,
            "order_id": record.tracking_code,
        });
        let response = self.send("/v1.1/payment/verify", &body).await?;

        let approved = status_code(&response["status"])
            .map(|status| VERIFIED.contains(&status))
            .unwrap_or(false);
        let verification = Verification {
            approved,
            response_text: text(&response["error_message"])
                .or_else(|| text(&response["status"]).map(|s| format!("status {}", s))),
        };
        Ok(check_amount(
            verification,
            &response["amount"],
            request.amount,
            &record.tracking_code,
        ))
    }
}
