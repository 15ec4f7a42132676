//! Saman Electronic Payment (SEP) gateway
//!
//! Token-based flow: a token is requested server-side, the user is sent to
//! the payment page with that token, and the bank posts back `ResNum`,
//! `RefNum` and `State`. Verification uses `RefNum`.

use super::{ProviderContext, check_amount, endpoint, text};
use crate::currency::Currency;
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{
    BankProvider, CallbackOutcome, CallbackPayload, Initiation, PaymentRequest, Verification,
    VerifyRequest,
};
use crate::record::{BankType, ProviderExtension, SepExtension};
use crate::resolver::Credentials;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

/// Production host
pub const DEFAULT_BASE_URL: &str = "https://sep.shaparak.ir";

const TOKEN_PATH: &str = "/MobilePG/MobilePayment";
const PAYMENT_PATH: &str = "/OnlinePG/SendToken";
const VERIFY_PATH: &str = "/verifyTxnRandomSessionkey/ipg/VerifyTransaction";

/// SEP provider.
///
/// Credentials: `MERCHANT_CODE`, `TERMINAL_CODE`, and optionally `BASE_URL`
/// to point at a different host.
pub struct SepProvider {
    merchant_code: String,
    terminal_code: String,
    base_url: String,
    context: ProviderContext,
}

impl SepProvider {
    pub fn new(credentials: &Credentials, context: ProviderContext) -> PaymentResult<Self> {
        Ok(Self {
            merchant_code: credentials.require("MERCHANT_CODE")?.to_string(),
            terminal_code: credentials.require("TERMINAL_CODE")?.to_string(),
            base_url: endpoint(credentials, "BASE_URL", DEFAULT_BASE_URL),
            context,
        })
    }

    pub fn terminal_code(&self) -> &str {
        &self.terminal_code
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, path: &str, body: &Value) -> PaymentResult<Value> {
        self.context
            .transport
            .post_json(&self.url(path), body, &[], self.context.timeout)
            .await
    }
}

#[async_trait]
impl BankProvider for SepProvider {
    fn bank_type(&self) -> BankType {
        BankType::Sep
    }

    fn gateway_currency(&self) -> Currency {
        Currency::Irr
    }

    async fn initiate(&self, request: &PaymentRequest) -> PaymentResult<Initiation> {
        let body = json!({
            "Action": "Token",
            "Amount": request.amount,
            "Wage": 0,
            "TerminalId": self.merchant_code,
            "ResNum": request.tracking_code,
            "RedirectURL": request.callback_url,
            "CellNumber": request.phone,
        });

        let response = self.send(TOKEN_PATH, &body).await?;
        let response_text = text(&response["errorDesc"]);

        let accepted = text(&response["status"]).as_deref() == Some("1");
        match (accepted, text(&response["token"])) {
            (true, Some(token)) => Ok(Initiation {
                reference_number: token,
                response_text,
            }),
            _ => Err(PaymentError::PaymentRejected(
                response_text.unwrap_or_else(|| "SEP refused to issue a token".to_string()),
            )),
        }
    }

    fn payment_url(&self, reference_number: &str) -> PaymentResult<Url> {
        Ok(Url::parse_with_params(
            &self.url(PAYMENT_PATH),
            &[("Token", reference_number), ("GetMethod", "true")],
        )?)
    }

    fn map_callback(&self, payload: &CallbackPayload) -> PaymentResult<CallbackOutcome> {
        let tracking_code = payload.require("ResNum")?.to_string();
        let ref_num = payload.get("RefNum").map(str::to_string);
        let approved = payload.get("State") == Some("OK") && ref_num.is_some();

        debug!(tracking_code = %tracking_code, state = ?payload.get("State"), "SEP callback");

        Ok(CallbackOutcome {
            tracking_code,
            approved,
            extension: ProviderExtension::Sep(SepExtension {
                ref_num,
                token: payload.get("Token").map(str::to_string),
                trace_no: payload.get("TraceNo").map(str::to_string),
                secure_pan: payload.get("SecurePan").map(str::to_string),
            }),
            response_text: payload.get("State").map(str::to_string),
        })
    }

    async fn verify_with_provider(&self, request: &VerifyRequest<'_>) -> PaymentResult<Verification> {
        let ref_num = request
            .record
            .extension
            .sep()
            .and_then(|ext| ext.ref_num.as_deref())
            .ok_or_else(|| {
                PaymentError::InvalidCallback(format!(
                    "no RefNum stored for {}",
                    request.record.tracking_code
                ))
            })?;

        let body = json!({
            "RefNum": ref_num,
            "TerminalNumber": self.merchant_code,
        });
        let response = self.send(VERIFY_PATH, &body).await?;

        let verification = Verification {
            approved: response["ResultCode"].as_i64() == Some(0),
            response_text: text(&response["ResultDescription"])
                .or_else(|| text(&response["errorDesc"])),
        };
        Ok(check_amount(
            verification,
            &response["TransactionDetail"]["OrginalAmount"],
            request.amount,
            &request.record.tracking_code,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedTransport;
    use crate::record::TransactionRecord;
    use chrono::Utc;
    use std::sync::Arc;

    fn credentials() -> Credentials {
        Credentials::new()
            .with("MERCHANT_CODE", "21001")
            .with("TERMINAL_CODE", "T-9")
    }

    fn provider(transport: Arc<ScriptedTransport>) -> SepProvider {
        let context = ProviderContext::new(transport, crate::transport::DEFAULT_TIMEOUT);
        SepProvider::new(&credentials(), context).unwrap()
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            tracking_code: "tc1".into(),
            amount: 500_000,
            callback_url: "https://shop.example/callback".into(),
            phone: Some("09120000000".into()),
        }
    }

    #[test]
    fn test_missing_terminal_code() {
        let transport = Arc::new(ScriptedTransport::new());
        let context = ProviderContext::new(transport, crate::transport::DEFAULT_TIMEOUT);
        let credentials = Credentials::new().with("MERCHANT_CODE", "21001");
        assert!(matches!(
            SepProvider::new(&credentials, context),
            Err(PaymentError::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_initiate_sends_token_request() {
        let transport = Arc::new(
            ScriptedTransport::new().respond(Ok(json!({"status": 1, "token": "TOKEN-1"}))),
        );
        let initiation = provider(transport.clone()).initiate(&request()).await.unwrap();
        assert_eq!(initiation.reference_number, "TOKEN-1");

        let sent = transport.sent();
        assert_eq!(sent[0].url, "https://sep.shaparak.ir/MobilePG/MobilePayment");
        assert_eq!(
            sent[0].body,
            json!({
                "Action": "Token",
                "Amount": 500_000,
                "Wage": 0,
                "TerminalId": "21001",
                "ResNum": "tc1",
                "RedirectURL": "https://shop.example/callback",
                "CellNumber": "09120000000",
            })
        );
    }

    #[tokio::test]
    async fn test_initiate_rejected() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(Ok(json!({"status": -1, "errorCode": 5, "errorDesc": "invalid terminal"}))),
        );
        let err = provider(transport).initiate(&request()).await.unwrap_err();
        match err {
            PaymentError::PaymentRejected(reason) => assert_eq!(reason, "invalid terminal"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initiate_transport_error_propagates() {
        let transport = Arc::new(
            ScriptedTransport::new().respond(Err(PaymentError::Connection("refused".into()))),
        );
        let err = provider(transport).initiate(&request()).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_payment_url() {
        let url = provider(Arc::new(ScriptedTransport::new()))
            .payment_url("TOKEN-1")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sep.shaparak.ir/OnlinePG/SendToken?Token=TOKEN-1&GetMethod=true"
        );
    }

    #[test]
    fn test_base_url_override() {
        let credentials = credentials().with("BASE_URL", "http://localhost:8080/");
        let context = ProviderContext::new(
            Arc::new(ScriptedTransport::new()),
            crate::transport::DEFAULT_TIMEOUT,
        );
        let url = SepProvider::new(&credentials, context)
            .unwrap()
            .payment_url("T")
            .unwrap();
        assert!(url.as_str().starts_with("http://localhost:8080/OnlinePG/SendToken"));
    }

    #[test]
    fn test_callback_mapping() {
        let provider = provider(Arc::new(ScriptedTransport::new()));
        let payload = CallbackPayload::from_form(
            "ResNum=tc1&RefNum=R-77&State=OK&Token=TOKEN-1&TraceNo=9911&SecurePan=6037****1234",
        )
        .unwrap();

        let outcome = provider.map_callback(&payload).unwrap();
        assert_eq!(outcome.tracking_code, "tc1");
        assert!(outcome.approved);
        let ext = outcome.extension.sep().unwrap();
        assert_eq!(ext.ref_num.as_deref(), Some("R-77"));
        assert_eq!(ext.trace_no.as_deref(), Some("9911"));
        assert_eq!(ext.secure_pan.as_deref(), Some("6037****1234"));
    }

    #[test]
    fn test_callback_without_ref_num_not_approved() {
        let provider = provider(Arc::new(ScriptedTransport::new()));
        let payload = CallbackPayload::from_pairs([("ResNum", "tc1"), ("State", "OK")]);
        assert!(!provider.map_callback(&payload).unwrap().approved);

        let payload = CallbackPayload::from_pairs([("ResNum", "tc1"), ("State", "CanceledByUser")]);
        assert!(!provider.map_callback(&payload).unwrap().approved);

        let payload = CallbackPayload::from_pairs([("State", "OK")]);
        assert!(matches!(
            provider.map_callback(&payload),
            Err(PaymentError::InvalidCallback(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_uses_ref_num() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(Ok(json!({"ResultCode": 0, "ResultDescription": "Success"})))
                .respond(Ok(json!({"ResultCode": -2, "ResultDescription": "not found"}))),
        );
        let provider = provider(transport.clone());

        let mut record = TransactionRecord::new("tc1", BankType::Sep, 50_000, Utc::now());
        record.extension = ProviderExtension::Sep(SepExtension {
            ref_num: Some("R-77".into()),
            ..Default::default()
        });
        let request = VerifyRequest {
            record: &record,
            amount: 500_000,
        };

        let verification = provider.verify_with_provider(&request).await.unwrap();
        assert!(verification.approved);
        assert_eq!(verification.response_text.as_deref(), Some("Success"));
        assert_eq!(
            transport.sent()[0].body,
            json!({"RefNum": "R-77", "TerminalNumber": "21001"})
        );

        let verification = provider.verify_with_provider(&request).await.unwrap();
        assert!(!verification.approved);
    }

    #[tokio::test]
    async fn test_verify_rejects_amount_mismatch() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(Ok(json!({
                    "ResultCode": 0,
                    "TransactionDetail": {"RRN": "1", "OrginalAmount": 500_000}
                })))
                .respond(Ok(json!({
                    "ResultCode": 0,
                    "TransactionDetail": {"RRN": "1", "OrginalAmount": 1_000}
                }))),
        );
        let provider = provider(transport);

        let mut record = TransactionRecord::new("tc1", BankType::Sep, 50_000, Utc::now());
        record.extension = ProviderExtension::Sep(SepExtension {
            ref_num: Some("R-77".into()),
            ..Default::default()
        });
        let request = VerifyRequest {
            record: &record,
            amount: 500_000,
        };

        assert!(provider.verify_with_provider(&request).await.unwrap().approved);

        let mismatch = provider.verify_with_provider(&request).await.unwrap();
        assert!(!mismatch.approved);
        assert_eq!(
            mismatch.response_text.as_deref(),
            Some("amount mismatch: expected 500000, reported 1000")
        );
    }
}
