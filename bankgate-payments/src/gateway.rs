//! Bank provider capabilities and the payment orchestrator
//!
//! [`BankProvider`] covers the protocol-specific steps of one bank. [`Bank`]
//! owns everything the providers share: amount handling, the transaction
//! record, the status graph and the redirect window.
//!
//! # Lifecycle
//!
//! ```text
//! ready() ─► WAITING ─► redirect_gateway() ─► REDIRECT_TO_BANK
//!                                                   │
//!            verify_from_gateway(callback) ◄────────┘
//!                 │ approved              │ not approved
//!                 ▼                       ▼
//!          RETURN_FROM_BANK ─► verify()   CANCEL_BY_USER
//!                                 │
//!                     COMPLETE ◄──┴──► CANCEL_BY_USER
//! ```

use crate::clock::{Clock, SystemClock};
use crate::currency::{self, Currency};
use crate::error::{PaymentError, PaymentResult};
use crate::record::{BankType, OrderContext, PaymentStatus, ProviderExtension, TransactionRecord};
use crate::store::{Precondition, StoreError, TransactionStore};
use crate::{CHECK_GATEWAY_AMOUNT, GATEWAY_REDIRECT_WINDOW_SECS, MINIMUM_AMOUNT};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

/// Data sent to a provider to open a payment session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub tracking_code: String,
    /// Amount in the provider's gateway currency
    pub amount: i64,
    /// Where the bank posts the user back to
    pub callback_url: String,
    pub phone: Option<String>,
}

/// Provider answer to a successful initiation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Initiation {
    /// Session reference issued by the provider
    pub reference_number: String,
    pub response_text: Option<String>,
}

/// Form-encoded body the bank posts back to the merchant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    fields: HashMap<String, String>,
}

impl CallbackPayload {
    /// Parse an `application/x-www-form-urlencoded` body
    pub fn from_form(body: &str) -> PaymentResult<Self> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(body)
            .map_err(|e| PaymentError::InvalidCallback(e.to_string()))?;
        Ok(Self::from_pairs(pairs))
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Field value; empty values count as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> PaymentResult<&str> {
        self.get(key)
            .ok_or_else(|| PaymentError::InvalidCallback(format!("missing field {}", key)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A callback payload mapped onto the shared record vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub tracking_code: String,
    /// Whether the bank reports the user as having paid
    pub approved: bool,
    pub extension: ProviderExtension,
    pub response_text: Option<String>,
}

/// Inputs for the provider's verification call
#[derive(Debug, Clone, Copy)]
pub struct VerifyRequest<'a> {
    pub record: &'a TransactionRecord,
    /// Record amount converted to the gateway currency
    pub amount: i64,
}

/// Result of a verification round-trip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    pub approved: bool,
    pub response_text: Option<String>,
}

/// Protocol-specific steps of one bank gateway.
///
/// Implementations hold their own credentials and transport; they never
/// touch the store or change a record's status.
#[async_trait]
pub trait BankProvider: Send + Sync {
    fn bank_type(&self) -> BankType;

    /// Currency the gateway settles in
    fn gateway_currency(&self) -> Currency;

    /// Smallest gateway amount the provider accepts
    fn minimum_amount(&self) -> i64 {
        MINIMUM_AMOUNT
    }

    /// Open a payment session. A provider refusal is [`PaymentError::PaymentRejected`].
    async fn initiate(&self, request: &PaymentRequest) -> PaymentResult<Initiation>;

    /// Page the user is redirected to for a session
    fn payment_url(&self, reference_number: &str) -> PaymentResult<Url>;

    /// Read the provider's callback fields
    fn map_callback(&self, payload: &CallbackPayload) -> PaymentResult<CallbackOutcome>;

    /// Confirm the payment with the provider
    async fn verify_with_provider(&self, request: &VerifyRequest<'_>) -> PaymentResult<Verification>;
}

/// Payment orchestrator for one transaction attempt.
///
/// A `Bank` is not meant to be shared between transactions; create one per
/// attempt through [`crate::BankFactory`].
pub struct Bank {
    provider: Box<dyn BankProvider>,
    store: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
    currency: Currency,
    gateway_callback_url: String,
    tracking_code_query_param: String,
    amount: i64,
    gateway_amount: i64,
    tracking_code: Option<String>,
    reference_number: Option<String>,
    response_text: Option<String>,
    client_callback_url: Option<String>,
    mobile_number: Option<String>,
    record: Option<TransactionRecord>,
}

impl Bank {
    pub fn new(provider: Box<dyn BankProvider>, store: Arc<dyn TransactionStore>) -> Self {
        Self {
            provider,
            store,
            clock: Arc::new(SystemClock),
            currency: Currency::default(),
            gateway_callback_url: String::new(),
            tracking_code_query_param: "tc".to_string(),
            amount: 0,
            gateway_amount: 0,
            tracking_code: None,
            reference_number: None,
            response_text: None,
            client_callback_url: None,
            mobile_number: None,
            record: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    /// URL the bank posts its callback to
    pub fn with_gateway_callback_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_callback_url = url.into();
        self
    }

    pub fn with_tracking_code_query_param(mut self, param: impl Into<String>) -> Self {
        self.tracking_code_query_param = param.into();
        self
    }

    pub fn bank_type(&self) -> BankType {
        self.provider.bank_type()
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn set_currency(&mut self, currency: Currency) {
        self.currency = currency;
    }

    pub fn gateway_currency(&self) -> Currency {
        self.provider.gateway_currency()
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Amount in the gateway currency, valid after [`Bank::prepare_amount`]
    pub fn gateway_amount(&self) -> i64 {
        self.gateway_amount
    }

    pub fn tracking_code(&self) -> Option<&str> {
        self.tracking_code.as_deref()
    }

    pub fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }

    pub fn response_text(&self) -> Option<&str> {
        self.response_text.as_deref()
    }

    pub fn mobile_number(&self) -> Option<&str> {
        self.mobile_number.as_deref()
    }

    pub fn set_mobile_number(&mut self, mobile_number: impl Into<String>) {
        self.mobile_number = Some(mobile_number.into());
    }

    /// Record this attempt is bound to, if any
    pub fn record(&self) -> Option<&TransactionRecord> {
        self.record.as_ref()
    }

    /// Set the merchant amount, in the merchant currency
    pub fn set_amount(&mut self, amount: i64) -> PaymentResult<()> {
        if amount <= 0 {
            return Err(PaymentError::AmountInvalid(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        self.amount = amount;
        Ok(())
    }

    /// Convert the amount to the gateway currency and enforce the minimum
    pub fn prepare_amount(&mut self) -> PaymentResult<i64> {
        let gateway_amount = currency::convert(self.amount, self.currency, self.gateway_currency())?;
        let minimum = self.provider.minimum_amount();
        if gateway_amount < minimum {
            return Err(PaymentError::AmountTooSmall {
                amount: gateway_amount,
                minimum,
            });
        }
        self.gateway_amount = gateway_amount;
        Ok(gateway_amount)
    }

    /// Open a session with the provider under a fresh tracking code.
    ///
    /// Nothing is persisted; see [`Bank::ready`].
    pub async fn pay(&mut self) -> PaymentResult<Initiation> {
        let amount = self.prepare_amount()?;
        let tracking_code = uuid::Uuid::new_v4().simple().to_string();
        self.tracking_code = Some(tracking_code.clone());

        debug!(
            bank = %self.bank_type(),
            tracking_code = %tracking_code,
            amount,
            "Initiating payment"
        );

        let request = PaymentRequest {
            tracking_code,
            amount,
            callback_url: self.gateway_callback_url.clone(),
            phone: self.mobile_number.clone(),
        };

        let initiation = self.provider.initiate(&request).await.map_err(|e| {
            if let PaymentError::PaymentRejected(reason) = &e {
                error!(bank = %self.bank_type(), tracking_code = %request.tracking_code, reason = %reason, "Provider rejected payment");
            }
            e
        })?;

        self.reference_number = Some(initiation.reference_number.clone());
        self.response_text = initiation.response_text.clone();
        Ok(initiation)
    }

    /// Run [`Bank::pay`] and persist the new record in `WAITING`
    pub async fn ready(&mut self, order: Option<OrderContext>) -> PaymentResult<TransactionRecord> {
        self.pay().await?;

        let tracking_code = self
            .tracking_code
            .clone()
            .ok_or_else(|| PaymentError::RecordNotFound("no tracking code issued".to_string()))?;

        let mut record = TransactionRecord::new(
            tracking_code,
            self.bank_type(),
            self.amount,
            self.clock.now(),
        );
        record.reference_number = self.reference_number.clone();
        record.response_text = self.response_text.clone();
        record.phone = self.mobile_number.clone();
        record.callback_url = self.client_callback_url.clone();
        record.order = order;

        self.persist(&record, Precondition::Absent).await?;
        info!(
            bank = %record.bank_type,
            tracking_code = %record.tracking_code,
            amount = record.amount,
            "Transaction record created"
        );

        self.record = Some(record.clone());
        Ok(record)
    }

    /// Bind this instance to an existing record
    pub async fn load(&mut self, tracking_code: &str) -> PaymentResult<&TransactionRecord> {
        let record = self.fetch(tracking_code).await?;
        self.tracking_code = Some(record.tracking_code.clone());
        self.reference_number = record.reference_number.clone();
        self.client_callback_url = record.callback_url.clone();
        self.mobile_number = record.phone.clone();
        self.amount = record.amount;
        Ok(&*self.record.insert(record))
    }

    /// Move the record to `REDIRECT_TO_BANK` and return the bank's payment page.
    ///
    /// Past the redirect window the record expires instead.
    pub async fn redirect_gateway(&mut self) -> PaymentResult<Url> {
        let record = self.current_record()?;

        let age = record.age(self.clock.now());
        if age > chrono::Duration::seconds(GATEWAY_REDIRECT_WINDOW_SECS) {
            debug!(
                tracking_code = %record.tracking_code,
                age_ms = age.num_milliseconds(),
                "Gateway token expired"
            );
            self.transition(record, PaymentStatus::ExpireGatewayToken, None)
                .await?;
            return Err(PaymentError::GatewayTokenExpired);
        }

        let reference_number = record.reference_number.clone().ok_or_else(|| {
            PaymentError::RecordNotFound(format!(
                "{} has no provider reference",
                record.tracking_code
            ))
        })?;
        let url = self.provider.payment_url(&reference_number)?;

        let record = self
            .transition(record, PaymentStatus::RedirectToBank, None)
            .await?;
        debug!(tracking_code = %record.tracking_code, url = %url, "Redirecting to bank");
        Ok(url)
    }

    /// Handle the bank's callback.
    ///
    /// Unapproved callbacks end in `CANCEL_BY_USER` without a verification
    /// call; approved ones pass through `RETURN_FROM_BANK` into [`Bank::verify`].
    pub async fn verify_from_gateway(
        &mut self,
        payload: &CallbackPayload,
    ) -> PaymentResult<TransactionRecord> {
        let outcome = self.provider.map_callback(payload)?;
        let mut record = self.fetch(&outcome.tracking_code).await?;
        self.tracking_code = Some(record.tracking_code.clone());
        self.amount = record.amount;

        record.extension = outcome.extension;
        if outcome.response_text.is_some() {
            record.response_text = outcome.response_text;
        }

        if !outcome.approved {
            debug!(tracking_code = %record.tracking_code, "Callback not approved");
            return self
                .transition(record, PaymentStatus::CancelByUser, None)
                .await;
        }

        let record = self
            .transition(record, PaymentStatus::ReturnFromBank, None)
            .await?;
        self.verify(&record.tracking_code).await
    }

    /// Confirm a returned payment with the provider.
    ///
    /// Only records in `RETURN_FROM_BANK` are verified. A transport failure leaves the record in `RETURN_FROM_BANK`, so the
    /// call can be repeated.
    pub async fn verify(&mut self, tracking_code: &str) -> PaymentResult<TransactionRecord> {
        let record = self.fetch(tracking_code).await?;
        if record.status != PaymentStatus::ReturnFromBank {
            error!(
                tracking_code = %record.tracking_code,
                status = ?record.status,
                "Verification requested for a payment that has not returned from the bank"
            );
            return Err(PaymentError::StateInvalid {
                from: Some(record.status),
                to: PaymentStatus::Complete,
            });
        }
        self.tracking_code = Some(record.tracking_code.clone());
        self.set_amount(record.amount)?;
        let amount = self.prepare_amount()?;

        let verification = self
            .provider
            .verify_with_provider(&VerifyRequest {
                record: &record,
                amount,
            })
            .await?;

        let next = if verification.approved {
            PaymentStatus::Complete
        } else {
            debug!(tracking_code = %record.tracking_code, "Provider did not approve payment");
            PaymentStatus::CancelByUser
        };
        self.transition(record, next, verification.response_text)
            .await
    }

    /// Where the user returns after the bank flow.
    ///
    /// Only allowed before the record exists.
    pub fn set_client_callback_url(&mut self, url: impl Into<String>) -> PaymentResult<()> {
        if let Some(record) = &self.record {
            error!(
                tracking_code = %record.tracking_code,
                status = ?record.status,
                "Attempt to change the callback URL of an existing transaction"
            );
            return Err(PaymentError::InvalidStateForCallbackChange(record.status));
        }
        self.client_callback_url = Some(url.into());
        Ok(())
    }

    /// Client callback URL carrying the tracking code
    pub fn redirect_client_callback(&self) -> PaymentResult<String> {
        let record = self.current_record()?;
        let callback = record.callback_url.as_deref().ok_or_else(|| {
            PaymentError::ConfigurationMissing(format!(
                "no client callback URL for {}",
                record.tracking_code
            ))
        })?;
        debug!(tracking_code = %record.tracking_code, "Redirecting to client");
        Ok(append_query(
            callback,
            &self.tracking_code_query_param,
            &record.tracking_code,
        ))
    }

    /// Probe the provider with a throwaway initiation
    pub async fn check_gateway(&mut self, amount: Option<i64>) -> PaymentResult<Initiation> {
        self.set_amount(amount.unwrap_or(CHECK_GATEWAY_AMOUNT))?;
        self.set_client_callback_url("/")?;
        self.pay().await
    }

    fn current_record(&self) -> PaymentResult<TransactionRecord> {
        self.record.clone().ok_or_else(|| {
            PaymentError::RecordNotFound(
                self.tracking_code
                    .clone()
                    .unwrap_or_else(|| "no transaction prepared".to_string()),
            )
        })
    }

    async fn fetch(&self, tracking_code: &str) -> PaymentResult<TransactionRecord> {
        self.store
            .find(tracking_code)
            .await
            .map_err(|e| PaymentError::Store(e.to_string()))?
            .ok_or_else(|| {
                debug!(tracking_code, "No transaction record");
                PaymentError::RecordNotFound(tracking_code.to_string())
            })
    }

    /// The only place a record's status changes
    async fn transition(
        &mut self,
        mut record: TransactionRecord,
        next: PaymentStatus,
        response_text: Option<String>,
    ) -> PaymentResult<TransactionRecord> {
        let current = record.status;
        if !PaymentStatus::can_transition(Some(current), next) {
            error!(
                tracking_code = %record.tracking_code,
                from = ?current,
                to = ?next,
                "Rejected out-of-order status change"
            );
            return Err(PaymentError::StateInvalid {
                from: Some(current),
                to: next,
            });
        }

        record.status = next;
        if response_text.is_some() {
            record.response_text = response_text;
        }
        self.persist(&record, Precondition::Status(current)).await?;

        debug!(
            tracking_code = %record.tracking_code,
            from = ?current,
            status = ?next,
            "Payment status changed"
        );
        self.record = Some(record.clone());
        Ok(record)
    }

    async fn persist(&self, record: &TransactionRecord, expected: Precondition) -> PaymentResult<()> {
        self.store
            .upsert(record, expected)
            .await
            .map_err(|e| match e {
                StoreError::Conflict { found, .. } => {
                    error!(
                        tracking_code = %record.tracking_code,
                        found = ?found,
                        to = ?record.status,
                        "Concurrent status change detected"
                    );
                    PaymentError::StateInvalid {
                        from: found,
                        to: record.status,
                    }
                }
                StoreError::Backend(msg) => PaymentError::Store(msg),
            })
    }
}

impl std::fmt::Debug for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bank")
            .field("bank_type", &self.bank_type())
            .field("currency", &self.currency)
            .field("amount", &self.amount)
            .field("tracking_code", &self.tracking_code)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Append `key=value` to a possibly relative URL
pub(crate) fn append_query(base: &str, key: &str, value: &str) -> String {
    if let Ok(mut url) = Url::parse(base) {
        url.query_pairs_mut().append_pair(key, value);
        return url.into();
    }

    let pair = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(key, value)
        .finish();
    let separator = match base.find('?') {
        None => '?',
        Some(i) if i + 1 == base.len() => return format!("{}{}", base, pair),
        Some(_) => '&',
    };
    format!("{}{}{}", base, separator, pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryTransactionStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider whose answers are scripted by the test
    struct ScriptedProvider {
        currency: Currency,
        verifications: Mutex<VecDeque<PaymentResult<Verification>>>,
        verify_calls: Arc<AtomicUsize>,
        reject: bool,
    }

    impl ScriptedProvider {
        fn new(currency: Currency) -> Self {
            Self {
                currency,
                verifications: Mutex::new(VecDeque::new()),
                verify_calls: Arc::new(AtomicUsize::new(0)),
                reject: false,
            }
        }

        fn then_verify(self, result: PaymentResult<Verification>) -> Self {
            self.verifications.lock().unwrap().push_back(result);
            self
        }
    }

    #[async_trait]
    impl BankProvider for ScriptedProvider {
        fn bank_type(&self) -> BankType {
            BankType::Sep
        }

        fn gateway_currency(&self) -> Currency {
            self.currency
        }

        async fn initiate(&self, request: &PaymentRequest) -> PaymentResult<Initiation> {
            if self.reject {
                return Err(PaymentError::PaymentRejected("terminal disabled".into()));
            }
            Ok(Initiation {
                reference_number: format!("REF-{}", request.tracking_code),
                response_text: None,
            })
        }

        fn payment_url(&self, reference_number: &str) -> PaymentResult<Url> {
            Ok(Url::parse_with_params(
                "https://bank.example/pay",
                &[("Token", reference_number)],
            )?)
        }

        fn map_callback(&self, payload: &CallbackPayload) -> PaymentResult<CallbackOutcome> {
            Ok(CallbackOutcome {
                tracking_code: payload.require("tc")?.to_string(),
                approved: payload.get("state") == Some("OK"),
                extension: ProviderExtension::None,
                response_text: payload.get("message").map(str::to_string),
            })
        }

        async fn verify_with_provider(
            &self,
            _request: &VerifyRequest<'_>,
        ) -> PaymentResult<Verification> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            self.verifications
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Verification {
                    approved: true,
                    response_text: None,
                }))
        }
    }

    struct Harness {
        bank: Bank,
        store: Arc<InMemoryTransactionStore>,
        clock: Arc<ManualClock>,
        verify_calls: Arc<AtomicUsize>,
    }

    fn harness(provider: ScriptedProvider, currency: Currency) -> Harness {
        let store = Arc::new(InMemoryTransactionStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let verify_calls = provider.verify_calls.clone();
        let bank = Bank::new(Box::new(provider), store.clone())
            .with_clock(clock.clone())
            .with_currency(currency)
            .with_gateway_callback_url("https://shop.example/callback");
        Harness {
            bank,
            store,
            clock,
            verify_calls,
        }
    }

    fn callback(code: &str, state: &str) -> CallbackPayload {
        CallbackPayload::from_pairs([("tc", code), ("state", state)])
    }

    async fn redirected(h: &mut Harness) -> String {
        h.bank.set_amount(10_000).unwrap();
        let record = h.bank.ready(None).await.unwrap();
        h.bank.redirect_gateway().await.unwrap();
        record.tracking_code
    }

    #[test]
    fn test_set_amount_rejects_non_positive() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        assert!(matches!(h.bank.set_amount(0), Err(PaymentError::AmountInvalid(_))));
        assert!(matches!(h.bank.set_amount(-5), Err(PaymentError::AmountInvalid(_))));
        h.bank.set_amount(1).unwrap();
        assert_eq!(h.bank.amount(), 1);
    }

    #[test]
    fn test_minimum_amount_boundary() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);

        h.bank.set_amount(999).unwrap();
        assert!(matches!(
            h.bank.prepare_amount(),
            Err(PaymentError::AmountTooSmall { amount: 999, minimum: 1000 })
        ));

        h.bank.set_amount(1000).unwrap();
        assert_eq!(h.bank.prepare_amount().unwrap(), 1000);
    }

    #[test]
    fn test_gateway_amount_conversion() {
        // Merchant in toman, gateway in rial.
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irt);
        h.bank.set_amount(50_000).unwrap();
        assert_eq!(h.bank.prepare_amount().unwrap(), 500_000);

        // Merchant in rial, gateway in toman.
        let mut h = harness(ScriptedProvider::new(Currency::Irt), Currency::Irr);
        h.bank.set_amount(50_000).unwrap();
        assert_eq!(h.bank.prepare_amount().unwrap(), 5_000);
        assert_eq!(h.bank.gateway_amount(), 5_000);
    }

    #[tokio::test]
    async fn test_ready_persists_waiting_record() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank.set_amount(25_000).unwrap();
        h.bank.set_mobile_number("09120000000");
        h.bank
            .set_client_callback_url("https://shop.example/orders/7")
            .unwrap();

        let order = OrderContext::new("orders", json!({"id": 7}));
        let record = h.bank.ready(Some(order.clone())).await.unwrap();

        assert_eq!(record.status, PaymentStatus::Waiting);
        assert_eq!(record.amount, 25_000);
        assert_eq!(record.phone.as_deref(), Some("09120000000"));
        assert_eq!(record.order, Some(order));
        assert_eq!(
            record.reference_number,
            Some(format!("REF-{}", record.tracking_code))
        );

        let stored = h.store.find(&record.tracking_code).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_rejected_initiation_creates_no_record() {
        let mut provider = ScriptedProvider::new(Currency::Irr);
        provider.reject = true;
        let mut h = harness(provider, Currency::Irr);
        h.bank.set_amount(10_000).unwrap();

        let err = h.bank.ready(None).await.unwrap_err();
        assert!(matches!(err, PaymentError::PaymentRejected(_)));
        assert!(h.store.is_empty().await);
        assert!(h.bank.record().is_none());
    }

    #[tokio::test]
    async fn test_redirect_within_window() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank.set_amount(10_000).unwrap();
        let record = h.bank.ready(None).await.unwrap();

        h.clock.advance_secs(119);
        let url = h.bank.redirect_gateway().await.unwrap();
        assert!(url.as_str().starts_with("https://bank.example/pay?Token=REF-"));

        let stored = h.store.find(&record.tracking_code).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::RedirectToBank);
    }

    #[tokio::test]
    async fn test_redirect_after_window_expires() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank.set_amount(10_000).unwrap();
        let record = h.bank.ready(None).await.unwrap();

        h.clock.advance_secs(121);
        let err = h.bank.redirect_gateway().await.unwrap_err();
        assert!(matches!(err, PaymentError::GatewayTokenExpired));

        let stored = h.store.find(&record.tracking_code).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::ExpireGatewayToken);
    }

    #[tokio::test]
    async fn test_redirect_window_counts_fractional_seconds() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank.set_amount(10_000).unwrap();
        let record = h.bank.ready(None).await.unwrap();

        h.clock.advance(chrono::Duration::milliseconds(120_900));
        let err = h.bank.redirect_gateway().await.unwrap_err();
        assert!(matches!(err, PaymentError::GatewayTokenExpired));

        let stored = h.store.find(&record.tracking_code).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::ExpireGatewayToken);
    }

    #[tokio::test]
    async fn test_redirect_at_exact_window_edge() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank.set_amount(10_000).unwrap();
        h.bank.ready(None).await.unwrap();

        h.clock.advance_secs(GATEWAY_REDIRECT_WINDOW_SECS);
        assert!(h.bank.redirect_gateway().await.is_ok());
    }

    #[tokio::test]
    async fn test_approved_callback_completes() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        let code = redirected(&mut h).await;

        let record = h.bank.verify_from_gateway(&callback(&code, "OK")).await.unwrap();
        assert_eq!(record.status, PaymentStatus::Complete);
        assert!(record.is_success());
        assert_eq!(h.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unapproved_callback_cancels_without_verify() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        let code = redirected(&mut h).await;

        let record = h
            .bank
            .verify_from_gateway(&callback(&code, "CanceledByUser"))
            .await
            .unwrap();
        assert_eq!(record.status, PaymentStatus::CancelByUser);
        assert_eq!(h.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declined_verification_cancels() {
        let provider = ScriptedProvider::new(Currency::Irr).then_verify(Ok(Verification {
            approved: false,
            response_text: Some("reversed".into()),
        }));
        let mut h = harness(provider, Currency::Irr);
        let code = redirected(&mut h).await;

        let record = h.bank.verify_from_gateway(&callback(&code, "OK")).await.unwrap();
        assert_eq!(record.status, PaymentStatus::CancelByUser);
        assert_eq!(record.response_text.as_deref(), Some("reversed"));
    }

    #[tokio::test]
    async fn test_duplicate_callback_is_state_invalid() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        let code = redirected(&mut h).await;

        h.bank.verify_from_gateway(&callback(&code, "OK")).await.unwrap();
        let err = h
            .bank
            .verify_from_gateway(&callback(&code, "OK"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::StateInvalid {
                to: PaymentStatus::ReturnFromBank,
                ..
            }
        ));
        assert_eq!(h.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_before_redirect_is_state_invalid() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank.set_amount(10_000).unwrap();
        let record = h.bank.ready(None).await.unwrap();

        let err = h
            .bank
            .verify_from_gateway(&callback(&record.tracking_code, "OK"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::StateInvalid {
                from: Some(PaymentStatus::Waiting),
                to: PaymentStatus::ReturnFromBank
            }
        ));
        assert_eq!(h.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_callback_for_unknown_record() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        let err = h
            .bank
            .verify_from_gateway(&callback("missing", "OK"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_transport_error_leaves_return_from_bank() {
        let provider = ScriptedProvider::new(Currency::Irr)
            .then_verify(Err(PaymentError::Timeout("5s".into())));
        let mut h = harness(provider, Currency::Irr);
        let code = redirected(&mut h).await;

        let err = h
            .bank
            .verify_from_gateway(&callback(&code, "OK"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        let stored = h.store.find(&code).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::ReturnFromBank);

        // The caller retries verification on its own.
        let record = h.bank.verify(&code).await.unwrap();
        assert_eq!(record.status, PaymentStatus::Complete);
    }

    #[tokio::test]
    async fn test_verify_requires_return_from_bank() {
        let provider = ScriptedProvider::new(Currency::Irr).then_verify(Ok(Verification {
            approved: false,
            response_text: None,
        }));
        let mut h = harness(provider, Currency::Irr);
        h.bank.set_amount(10_000).unwrap();
        let code = h.bank.ready(None).await.unwrap().tracking_code;

        for expected in [PaymentStatus::Waiting, PaymentStatus::RedirectToBank] {
            let err = h.bank.verify(&code).await.unwrap_err();
            assert!(matches!(
                err,
                PaymentError::StateInvalid {
                    from: Some(from),
                    to: PaymentStatus::Complete
                } if from == expected
            ));
            let stored = h.store.find(&code).await.unwrap().unwrap();
            assert_eq!(stored.status, expected);

            if expected == PaymentStatus::Waiting {
                h.bank.redirect_gateway().await.unwrap();
            }
        }
        assert_eq!(h.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_callback_url_locked_after_record_exists() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank.set_client_callback_url("https://shop.example/a").unwrap();
        h.bank.set_client_callback_url("https://shop.example/b").unwrap();
        h.bank.set_amount(10_000).unwrap();
        let record = h.bank.ready(None).await.unwrap();
        assert_eq!(record.callback_url.as_deref(), Some("https://shop.example/b"));

        let err = h
            .bank
            .set_client_callback_url("https://evil.example")
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidStateForCallbackChange(PaymentStatus::Waiting)
        ));
    }

    #[tokio::test]
    async fn test_redirect_client_callback_appends_tracking_code() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank
            .set_client_callback_url("https://shop.example/done?order=7")
            .unwrap();
        h.bank.set_amount(10_000).unwrap();
        let record = h.bank.ready(None).await.unwrap();

        assert_eq!(
            h.bank.redirect_client_callback().unwrap(),
            format!("https://shop.example/done?order=7&tc={}", record.tracking_code)
        );
    }

    #[tokio::test]
    async fn test_load_binds_existing_record() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        h.bank.set_amount(10_000).unwrap();
        let record = h.bank.ready(None).await.unwrap();

        let mut other = Bank::new(Box::new(ScriptedProvider::new(Currency::Irr)), h.store.clone())
            .with_clock(h.clock.clone());
        other.load(&record.tracking_code).await.unwrap();
        other.redirect_gateway().await.unwrap();
        assert!(other.set_client_callback_url("/x").is_err());
    }

    #[tokio::test]
    async fn test_check_gateway_persists_nothing() {
        let mut h = harness(ScriptedProvider::new(Currency::Irr), Currency::Irr);
        let initiation = h.bank.check_gateway(None).await.unwrap();
        assert!(initiation.reference_number.starts_with("REF-"));
        assert_eq!(h.bank.amount(), CHECK_GATEWAY_AMOUNT);
        assert!(h.store.is_empty().await);
    }

    #[test]
    fn test_callback_payload_from_form() {
        let payload = CallbackPayload::from_form("ResNum=abc&State=OK&RefNum=&Token=t%201").unwrap();
        assert_eq!(payload.get("ResNum"), Some("abc"));
        assert_eq!(payload.get("Token"), Some("t 1"));
        assert_eq!(payload.get("RefNum"), None);
        assert!(matches!(
            payload.require("TraceNo"),
            Err(PaymentError::InvalidCallback(_))
        ));
    }

    #[test]
    fn test_append_query_relative() {
        assert_eq!(append_query("/", "tc", "x1"), "/?tc=x1");
        assert_eq!(append_query("/done?a=1", "tc", "x1"), "/done?a=1&tc=x1");
        assert_eq!(append_query("/done?", "tc", "x 1"), "/done?tc=x+1");
    }
}
