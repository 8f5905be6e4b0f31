//! Payment capture
//!
//! Three ways money reaches an order:
//! - wallet balance: debit + approved payment row in one transaction
//! - redirect gateway: pending row now, confirmed by a signed notify
//! - manual proof: pending-review row, an admin decides

use super::registry::{PaymentRegistry, UserMethod};
use super::{CreatePaymentRequest, METHOD_APPROVAL, METHOD_BALANCE, RawNotify};
use crate::core::context::CoreContext;
use crate::db::repository::payment::{self as payment_repo, NewPayment};
use crate::db::repository::{self, order as order_repo, order_item, payment_provider};
use crate::events::OrderEventType;
use crate::orders::approval::ensure_pending_review;
use crate::orders::{ApprovedBy, OrderApprover};
use crate::wallet::{WalletService, apply_adjustment, ref_type};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shared::models::{Order, OrderPayment, OrderStatus, PaymentStatus};
use shared::{AppError, AppResult, ErrorCode};
use std::sync::Arc;

const METHOD_MAX: usize = 64;
const TRADE_NO_MAX: usize = 128;
const NOTE_MAX: usize = 1000;
const SCREENSHOT_MAX: usize = 1024;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitPayment {
    pub method: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub trade_no: Option<String>,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Zero-amount order, nothing to collect
    NoPaymentRequired,
    /// Settled from the wallet
    Paid { payment: OrderPayment },
    /// Continue on the gateway page
    Redirect {
        payment: OrderPayment,
        pay_url: String,
        extra: Value,
    },
    /// Transfer off-line, then submit proof
    Manual { instructions: Value },
    /// Proof recorded, waiting for review
    Submitted { payment: OrderPayment },
}

fn check_len(field: &str, value: Option<&str>, max: usize) -> AppResult<()> {
    if value.is_some_and(|v| v.chars().count() > max) {
        return Err(AppError::validation(format!("{field} exceeds {max} characters")));
    }
    Ok(())
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct PaymentService {
    ctx: Arc<CoreContext>,
    wallet: WalletService,
    registry: Arc<PaymentRegistry>,
    approver: Arc<dyn OrderApprover>,
    public_base_url: String,
}

impl PaymentService {
    pub fn new(
        ctx: Arc<CoreContext>,
        wallet: WalletService,
        registry: Arc<PaymentRegistry>,
        approver: Arc<dyn OrderApprover>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            wallet,
            registry,
            approver,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<PaymentRegistry> {
        &self.registry
    }

    pub async fn user_methods(&self, user_id: i64) -> AppResult<Vec<UserMethod>> {
        let balance = self.wallet.balance(user_id).await?;
        self.registry.user_methods(balance).await
    }

    async fn owned_order(&self, user_id: i64, order_id: i64) -> AppResult<Order> {
        order_repo::find_by_id(&self.ctx.pool, order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| AppError::new(ErrorCode::OrderNotFound).with_detail("order_id", order_id))
    }

    /// Record a payment against the caller's order
    pub async fn submit_payment(
        &self,
        user_id: i64,
        order_id: i64,
        req: &SubmitPayment,
        idempotency_key: Option<&str>,
    ) -> AppResult<PaymentOutcome> {
        let method = req.method.trim();
        if method.is_empty() {
            return Err(AppError::validation("method is required"));
        }
        check_len("method", Some(method), METHOD_MAX)?;
        check_len("trade_no", req.trade_no.as_deref(), TRADE_NO_MAX)?;
        check_len("note", req.note.as_deref(), NOTE_MAX)?;
        check_len("screenshot_url", req.screenshot_url.as_deref(), SCREENSHOT_MAX)?;
        if req.amount <= 0 {
            return Err(AppError::validation("amount must be positive"));
        }

        let order = self.owned_order(user_id, order_id).await?;
        if order.total_amount <= 0 {
            return Err(AppError::no_payment_required());
        }
        if let Some(currency) = trimmed(req.currency.as_deref())
            && !currency.eq_ignore_ascii_case(&order.currency)
        {
            return Err(AppError::validation(format!(
                "currency {currency} does not match order currency {}",
                order.currency
            )));
        }

        let key = trimmed(idempotency_key);
        if let Some(key) = key
            && let Some(existing) = payment_repo::find_by_idempotency_key(&self.ctx.pool, order.id, key).await?
        {
            return Ok(Self::replayed(existing));
        }
        let trade_no = trimmed(req.trade_no.as_deref());
        if let Some(trade_no) = trade_no
            && let Some(existing) = payment_repo::find_by_trade_no(&self.ctx.pool, trade_no).await?
        {
            if existing.order_id != order.id {
                return Err(AppError::conflict("trade_no already used by another order"));
            }
            return Ok(Self::replayed(existing));
        }

        if !matches!(order.status, OrderStatus::PendingPayment | OrderStatus::PendingReview) {
            return Err(AppError::conflict(format!(
                "order {} does not accept payments while {}",
                order.order_no, order.status
            )));
        }

        if method == METHOD_BALANCE {
            self.require_full_amount(&order, req.amount)?;
            let payment = self.pay_with_balance(&order, key).await?;
            return Ok(PaymentOutcome::Paid { payment });
        }
        if method != METHOD_APPROVAL && self.registry.get(method).is_ok() {
            self.require_full_amount(&order, req.amount)?;
            return self.start_gateway(&order, method, None, None, key).await;
        }
        self.submit_proof(&order, method, req, trade_no, key).await
    }

    fn replayed(payment: OrderPayment) -> PaymentOutcome {
        match payment.status {
            PaymentStatus::Approved => PaymentOutcome::Paid { payment },
            _ => PaymentOutcome::Submitted { payment },
        }
    }

    fn require_full_amount(&self, order: &Order, amount: i64) -> AppResult<()> {
        if amount != order.total_amount {
            return Err(AppError::validation("amount must equal the order total")
                .with_detail("expected", order.total_amount)
                .with_detail("actual", amount));
        }
        Ok(())
    }

    /// Pick a method for a `pending_payment` order and start it
    pub async fn select_payment(
        &self,
        user_id: i64,
        order_id: i64,
        method: &str,
        return_url: Option<&str>,
        notify_url: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> AppResult<PaymentOutcome> {
        let order = self.owned_order(user_id, order_id).await?;
        if order.status != OrderStatus::PendingPayment {
            return Err(AppError::conflict(format!(
                "order {} is not awaiting payment ({})",
                order.order_no, order.status
            )));
        }
        if order.total_amount <= 0 {
            return Ok(PaymentOutcome::NoPaymentRequired);
        }

        let method = method.trim();
        let provider = self.registry.enabled(method).await?;
        let key = trimmed(idempotency_key);
        match method {
            METHOD_APPROVAL => {
                let config = payment_provider::find(&self.ctx.pool, METHOD_APPROVAL)
                    .await?
                    .and_then(|row| serde_json::from_str::<Value>(&row.config_json).ok());
                let text = config
                    .as_ref()
                    .and_then(|c| c.get("instructions"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(PaymentOutcome::Manual {
                    instructions: json!({
                        "method": provider.key(),
                        "order_no": order.order_no,
                        "amount": order.total_amount,
                        "currency": order.currency,
                        "text": text,
                    }),
                })
            }
            METHOD_BALANCE => {
                if let Some(key) = key
                    && let Some(existing) = payment_repo::find_by_idempotency_key(&self.ctx.pool, order.id, key).await?
                {
                    return Ok(Self::replayed(existing));
                }
                let payment = self.pay_with_balance(&order, key).await?;
                Ok(PaymentOutcome::Paid { payment })
            }
            _ => self.start_gateway(&order, method, return_url, notify_url, key).await,
        }
    }

    async fn pay_with_balance(&self, order: &Order, key: Option<&str>) -> AppResult<OrderPayment> {
        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        apply_adjustment(
            &mut tx,
            order.user_id,
            -order.total_amount,
            ref_type::ORDER,
            order.id,
            &format!("payment for {}", order.order_no),
            now,
        )
        .await?;
        let moved = order_repo::transition(
            &mut *tx,
            order.id,
            &[OrderStatus::PendingPayment],
            OrderStatus::PendingReview,
            now,
        )
        .await?;
        if !moved {
            // Dropping the transaction rolls back the debit
            return Err(AppError::conflict(format!("order {} is no longer awaiting payment", order.order_no)));
        }
        order_item::set_status_by_order(
            &mut *tx,
            order.id,
            &[OrderStatus::PendingPayment],
            OrderStatus::PendingReview,
            now,
        )
        .await?;
        let payment_id = payment_repo::insert(
            &mut *tx,
            &NewPayment {
                order_id: order.id,
                user_id: order.user_id,
                method: METHOD_BALANCE,
                amount: order.total_amount,
                currency: &order.currency,
                idempotency_key: key,
                ..Default::default()
            },
            PaymentStatus::Approved,
            now,
        )
        .await?;
        repository::commit(tx).await?;
        tracing::info!(order_id = order.id, payment_id, amount = order.total_amount, "Order paid from wallet");

        self.ctx
            .events
            .publish(order.id, OrderEventType::PendingReview, json!({}))
            .await;
        self.ctx
            .events
            .publish(
                order.id,
                OrderEventType::PaymentApproved,
                json!({ "payment_id": payment_id, "method": METHOD_BALANCE, "amount": order.total_amount }),
            )
            .await;

        if let Err(e) = self.approver.approve_order(order.id, ApprovedBy::System).await {
            tracing::warn!(order_id = order.id, error = %e, "Auto-approval after wallet payment failed");
        }
        self.load_payment(payment_id).await
    }

    async fn start_gateway(
        &self,
        order: &Order,
        method: &str,
        return_url: Option<&str>,
        notify_url: Option<&str>,
        key: Option<&str>,
    ) -> AppResult<PaymentOutcome> {
        let provider = self.registry.enabled(method).await?;
        let req = CreatePaymentRequest {
            order_id: order.id,
            order_no: order.order_no.clone(),
            user_id: order.user_id,
            amount: order.total_amount,
            currency: order.currency.clone(),
            subject: format!("Order {}", order.order_no),
            return_url: trimmed(return_url)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}/orders/{}", self.public_base_url, order.id)),
            notify_url: trimmed(notify_url)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}/api/v1/payments/notify/{method}", self.public_base_url)),
        };
        let created = provider.create_payment(&req).await?;

        let payment_id = payment_repo::insert(
            &self.ctx.pool,
            &NewPayment {
                order_id: order.id,
                user_id: order.user_id,
                method,
                amount: order.total_amount,
                currency: &order.currency,
                trade_no: trimmed(Some(&created.trade_no)),
                idempotency_key: key,
                ..Default::default()
            },
            PaymentStatus::PendingPayment,
            self.ctx.now(),
        )
        .await?;
        tracing::info!(order_id = order.id, payment_id, provider = method, "Gateway payment started");
        self.ctx
            .events
            .publish(
                order.id,
                OrderEventType::PaymentCreated,
                json!({ "payment_id": payment_id, "method": method, "trade_no": created.trade_no }),
            )
            .await;

        Ok(PaymentOutcome::Redirect {
            payment: self.load_payment(payment_id).await?,
            pay_url: created.pay_url,
            extra: created.extra,
        })
    }

    async fn submit_proof(
        &self,
        order: &Order,
        method: &str,
        req: &SubmitPayment,
        trade_no: Option<&str>,
        key: Option<&str>,
    ) -> AppResult<PaymentOutcome> {
        let payment_id = payment_repo::insert(
            &self.ctx.pool,
            &NewPayment {
                order_id: order.id,
                user_id: order.user_id,
                method,
                amount: req.amount,
                currency: &order.currency,
                trade_no,
                idempotency_key: key,
                screenshot_url: trimmed(req.screenshot_url.as_deref()),
                note: trimmed(req.note.as_deref()),
            },
            PaymentStatus::PendingReview,
            self.ctx.now(),
        )
        .await?;
        ensure_pending_review(&self.ctx, order.id).await?;

        let payment = self.load_payment(payment_id).await?;
        self.ctx
            .events
            .publish(
                order.id,
                OrderEventType::PaymentSubmitted,
                json!({ "payment_id": payment_id, "method": method, "amount": req.amount }),
            )
            .await;
        self.ctx.notify.admin_new_payment(order, &payment).await;
        tracing::info!(order_id = order.id, payment_id, method, "Payment proof submitted");
        Ok(PaymentOutcome::Submitted { payment })
    }

    async fn load_payment(&self, id: i64) -> AppResult<OrderPayment> {
        payment_repo::find_by_id(&self.ctx.pool, id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::PaymentNotFound).with_detail("payment_id", id))
    }

    /// Provider callback. Returns the body to acknowledge with; any error
    /// makes the provider retry.
    pub async fn handle_notify(&self, provider_key: &str, raw: &RawNotify) -> AppResult<String> {
        let provider = self.registry.get(provider_key)?;
        let result = provider.verify_notify(raw).await.map_err(|e| {
            tracing::warn!(provider = provider_key, error = %e, "Payment notify rejected");
            if e.code == ErrorCode::PaymentVerifyFailed {
                e
            } else {
                AppError::with_message(ErrorCode::PaymentVerifyFailed, e.message)
            }
        })?;
        if !result.paid {
            return Err(AppError::invalid_request("payment not completed"));
        }

        let mut payment = None;
        if let Some(order) = order_repo::find_by_order_no(&self.ctx.pool, &result.order_no).await? {
            payment = payment_repo::find_latest_by_order_method(&self.ctx.pool, order.id, provider_key).await?;
        }
        if payment.is_none() && !result.trade_no.is_empty() {
            payment = payment_repo::find_by_trade_no(&self.ctx.pool, &result.trade_no).await?;
        }
        let payment = payment.ok_or_else(|| {
            AppError::new(ErrorCode::PaymentNotFound).with_detail("order_no", result.order_no.clone())
        })?;

        if payment.status == PaymentStatus::Approved {
            tracing::debug!(payment_id = payment.id, "Duplicate payment notify");
            return Ok(result.ack_body);
        }
        if result.amount != payment.amount {
            return Err(AppError::with_message(ErrorCode::PaymentVerifyFailed, "amount mismatch")
                .with_detail("expected", payment.amount)
                .with_detail("actual", result.amount));
        }

        if !result.trade_no.is_empty()
            && let Some(other) = payment_repo::find_by_trade_no(&self.ctx.pool, &result.trade_no).await?
            && other.id != payment.id
        {
            tracing::warn!(payment_id = payment.id, other_payment_id = other.id, trade_no = %result.trade_no, "Notify trade_no belongs to another payment");
            return Err(AppError::conflict("trade_no already used by another payment")
                .with_detail("trade_no", result.trade_no.clone()));
        }

        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        let confirmed = payment_repo::approve(&mut *tx, payment.id, trimmed(Some(&result.trade_no)), now).await?;
        repository::commit(tx).await?;
        if !confirmed {
            // A concurrent delivery won the race
            return Ok(result.ack_body);
        }
        tracing::info!(order_id = payment.order_id, payment_id = payment.id, provider = provider_key, "Payment confirmed");

        ensure_pending_review(&self.ctx, payment.order_id).await?;
        self.ctx
            .events
            .publish(
                payment.order_id,
                OrderEventType::PaymentConfirmed,
                json!({ "payment_id": payment.id, "method": provider_key, "trade_no": result.trade_no }),
            )
            .await;
        if let Err(e) = self.approver.approve_order(payment.order_id, ApprovedBy::System).await {
            tracing::warn!(order_id = payment.order_id, error = %e, "Auto-approval after notify failed");
        }
        Ok(result.ack_body)
    }
}
