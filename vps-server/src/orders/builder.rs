//! Cart → order builder

use super::pricing::{self, PricedItem};
use super::service::{DEFAULT_CURRENCY, OrderService, next_order_no};
use super::spec::CartSpec;
use crate::db::repository::{self, RepoError, cart, order as order_repo, order_item};
use crate::events::OrderEventType;
use crate::realname::ACTION_PURCHASE;
use serde::Deserialize;
use serde_json::json;
use shared::models::{CartItem, ItemAction, OrderDetail, OrderStatus};
use shared::{AppError, AppResult};

/// One line of a direct (cart-less) order
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLine {
    pub package_id: i64,
    pub system_id: i64,
    #[serde(default)]
    pub spec: CartSpec,
    #[serde(default = "one")]
    pub qty: i64,
}

fn one() -> i64 {
    1
}

fn normalize_key(key: Option<&str>) -> Option<&str> {
    key.map(str::trim).filter(|k| !k.is_empty())
}

impl OrderService {
    /// Price the user's cart and turn it into one order, clearing the cart
    /// in the same transaction
    pub async fn create_from_cart(
        &self,
        user_id: i64,
        currency: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> AppResult<OrderDetail> {
        let key = normalize_key(idempotency_key);
        if let Some(existing) = self.find_idempotent(user_id, key).await? {
            return Ok(existing);
        }
        self.ctx.realname.require(user_id, ACTION_PURCHASE).await?;

        let cart_items = cart::list_by_user(&self.ctx.pool, user_id).await?;
        if cart_items.is_empty() {
            return Err(AppError::validation("cart is empty"));
        }
        let mut lines = Vec::with_capacity(cart_items.len());
        for ci in &cart_items {
            let spec = CartSpec::parse(&ci.spec_json)?;
            lines.push(pricing::price_item(&self.ctx.pool, ci.package_id, ci.system_id, &spec, ci.qty).await?);
        }
        self.build_order(user_id, lines, currency, key, true).await
    }

    /// Same as [`create_from_cart`](Self::create_from_cart) for explicit lines
    pub async fn create_from_items(
        &self,
        user_id: i64,
        items: &[OrderLine],
        currency: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> AppResult<OrderDetail> {
        let key = normalize_key(idempotency_key);
        if let Some(existing) = self.find_idempotent(user_id, key).await? {
            return Ok(existing);
        }
        self.ctx.realname.require(user_id, ACTION_PURCHASE).await?;
        if items.is_empty() {
            return Err(AppError::validation("items must not be empty"));
        }
        let mut lines = Vec::with_capacity(items.len());
        for line in items {
            lines.push(pricing::price_item(&self.ctx.pool, line.package_id, line.system_id, &line.spec, line.qty).await?);
        }
        self.build_order(user_id, lines, currency, key, false).await
    }

    async fn find_idempotent(&self, user_id: i64, key: Option<&str>) -> AppResult<Option<OrderDetail>> {
        let Some(key) = key else {
            return Ok(None);
        };
        match order_repo::find_by_idempotency_key(&self.ctx.pool, user_id, key).await? {
            Some(order) => {
                tracing::debug!(order_id = order.id, user_id, "Idempotent order hit");
                self.order_detail(order.id).await.map(Some)
            }
            None => Ok(None),
        }
    }

    async fn build_order(
        &self,
        user_id: i64,
        lines: Vec<PricedItem>,
        currency: Option<&str>,
        key: Option<&str>,
        clear_cart: bool,
    ) -> AppResult<OrderDetail> {
        let currency = currency
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CURRENCY)
            .to_ascii_uppercase();
        let total: i64 = lines.iter().map(PricedItem::total).sum();
        let now = self.ctx.now();

        let mut tx = repository::begin(&self.ctx.pool).await?;
        let order_no = next_order_no(&mut tx, ItemAction::Create.order_prefix(), user_id, now).await?;
        let inserted = order_repo::insert(
            &mut *tx,
            &order_repo::NewOrder {
                user_id,
                order_no: &order_no,
                status: OrderStatus::PendingPayment,
                total_amount: total,
                currency: &currency,
                idempotency_key: key,
                pending_reason: None,
            },
            now,
        )
        .await;
        let order_id = match inserted {
            Ok(id) => id,
            // Lost a race against the same key
            Err(RepoError::Duplicate(_)) if key.is_some() => {
                drop(tx);
                return self
                    .find_idempotent(user_id, key)
                    .await?
                    .ok_or_else(|| AppError::conflict("duplicate order"));
            }
            Err(e) => return Err(e.into()),
        };

        // qty=n expands into n single-instance items
        for line in &lines {
            let item = order_item::NewOrderItem {
                action: ItemAction::Create,
                package_id: Some(line.package.id),
                system_id: Some(line.system_id),
                spec_json: line.spec.to_json(),
                amount: line.unit_price,
                status: OrderStatus::PendingPayment,
                duration_months: line.duration_months,
                goods_type_id: line.plan_group.goods_type_id,
            };
            for _ in 0..line.qty {
                order_item::insert(&mut *tx, order_id, &item, now).await?;
            }
        }
        if clear_cart {
            cart::clear_by_user(&mut *tx, user_id).await?;
        }
        repository::commit(tx).await?;

        tracing::info!(order_id, %order_no, user_id, total, "Order created from {}", if clear_cart { "cart" } else { "items" });
        self.ctx
            .events
            .publish(
                order_id,
                OrderEventType::PendingPayment,
                json!({ "order_no": order_no, "total_amount": total }),
            )
            .await;
        self.order_detail(order_id).await
    }

    pub async fn cart(&self, user_id: i64) -> AppResult<Vec<CartItem>> {
        Ok(cart::list_by_user(&self.ctx.pool, user_id).await?)
    }

    /// Price one line and park it in the cart; the stored amount is
    /// informational, orders re-price from the catalog
    pub async fn add_to_cart(&self, user_id: i64, line: &OrderLine) -> AppResult<Vec<CartItem>> {
        let priced = pricing::price_item(&self.ctx.pool, line.package_id, line.system_id, &line.spec, line.qty).await?;
        cart::insert(
            &self.ctx.pool,
            user_id,
            line.package_id,
            line.system_id,
            &line.spec.to_json(),
            line.qty,
            priced.total(),
            self.ctx.now(),
        )
        .await?;
        self.cart(user_id).await
    }

    pub async fn remove_from_cart(&self, user_id: i64, cart_item_id: i64) -> AppResult<()> {
        if !cart::delete(&self.ctx.pool, user_id, cart_item_id).await? {
            return Err(AppError::not_found(format!("cart item {cart_item_id}")));
        }
        Ok(())
    }
}
