use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::order::{self, Column, Entity as OrderEntity};
use crate::entities::order_line_item::{self, Entity as OrderLineItemEntity};
use crate::errors::ServiceError;
use crate::models::order::{
    Contact, Order, OrderLineItem, OrderStatus, PaymentStatus, ShippingAddress,
};
use crate::services::pricing::round_money;

/// Gateway identifiers recorded when a payment is confirmed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentReference {
    pub payment_intent_id: Option<String>,
    pub transaction_id: Option<String>,
}

/// Persistence for the order aggregate.
///
/// Every state change is a conditional update guarded on the value the caller
/// observed; the returned `bool` says whether this call won.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    db: Arc<DatabaseConnection>,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts the order row and its lines in one transaction.
    #[instrument(skip(self, new_order), fields(order_id = %new_order.id))]
    pub async fn insert(&self, new_order: &Order) -> Result<Order, ServiceError> {
        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(new_order.id),
            owner_id: Set(new_order.owner_id.clone()),
            first_name: Set(new_order.contact.first_name.clone()),
            last_name: Set(new_order.contact.last_name.clone()),
            email: Set(new_order.contact.email.clone()),
            phone: Set(new_order.contact.phone.clone()),
            address: Set(new_order.shipping_address.address.clone()),
            city: Set(new_order.shipping_address.city.clone()),
            zip_code: Set(new_order.shipping_address.zip_code.clone()),
            state: Set(new_order.shipping_address.state.clone()),
            country: Set(new_order.shipping_address.country.clone()),
            payment_method: Set(new_order.payment_method),
            payment_status: Set(new_order.payment_status),
            status: Set(new_order.status),
            gateway_session_id: Set(new_order.gateway_session_id.clone()),
            gateway_payment_intent_id: Set(new_order.gateway_payment_intent_id.clone()),
            gateway_transaction_id: Set(new_order.gateway_transaction_id.clone()),
            subtotal: Set(new_order.subtotal),
            tax: Set(new_order.tax),
            shipping: Set(new_order.shipping),
            total: Set(new_order.total),
            currency: Set(new_order.currency.clone()),
            expected_delivery_date: Set(new_order.expected_delivery_date),
            delivered_at: Set(new_order.delivered_at),
            created_at: Set(new_order.created_at),
            updated_at: Set(new_order.updated_at),
            version: Set(new_order.version),
        }
        .insert(&txn)
        .await?;

        let lines = new_order
            .lines
            .iter()
            .enumerate()
            .map(|(position, line)| {
                let quantity = i32::try_from(line.quantity).map_err(|_| {
                    ServiceError::ValidationError(format!(
                        "quantity {} for {} cannot be stored",
                        line.quantity, line.item_id
                    ))
                })?;
                Ok(order_line_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(new_order.id),
                    position: Set(position as i32),
                    catalog_item_id: Set(line.item_id.clone()),
                    name: Set(line.name.clone()),
                    unit_price: Set(line.unit_price),
                    quantity: Set(quantity),
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;
        if !lines.is_empty() {
            OrderLineItemEntity::insert_many(lines).exec(&txn).await?;
        }

        let stored = load_one(&txn, new_order.id).await?.ok_or_else(|| {
            ServiceError::InternalError(format!("order {} vanished after insert", new_order.id))
        })?;
        txn.commit().await?;
        Ok(stored)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        load_one(&*self.db, id).await
    }

    pub async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Order>, ServiceError> {
        let found = OrderEntity::find()
            .filter(Column::GatewaySessionId.eq(session_id))
            .one(&*self.db)
            .await?;
        match found {
            Some(model) => load_one(&*self.db, model.id).await,
            None => Ok(None),
        }
    }

    /// Orders placed by `owner_id`, newest first.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Order>, ServiceError> {
        let rows = OrderEntity::find()
            .filter(Column::OwnerId.eq(owner_id))
            .order_by_desc(Column::CreatedAt)
            .find_with_related(OrderLineItemEntity)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|(o, l)| to_domain(o, l)).collect())
    }

    /// All orders, optionally filtered by fulfillment status, newest first.
    pub async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, ServiceError> {
        let mut query = OrderEntity::find();
        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }
        let rows = query
            .order_by_desc(Column::CreatedAt)
            .find_with_related(OrderLineItemEntity)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|(o, l)| to_domain(o, l)).collect())
    }

    /// `paymentStatus pending -> completed`, applying `promotion` to `status` in
    /// the same transaction while the row still holds its `from` value. Returns
    /// false if payment was no longer pending.
    #[instrument(skip(self, reference))]
    pub async fn complete_payment(
        &self,
        order_id: Uuid,
        reference: &PaymentReference,
        promotion: Option<(OrderStatus, OrderStatus)>,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let mut update = OrderEntity::update_many()
            .col_expr(Column::PaymentStatus, Expr::value(PaymentStatus::Completed))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1));
        if let Some(intent) = &reference.payment_intent_id {
            update = update.col_expr(Column::GatewayPaymentIntentId, Expr::value(intent.clone()));
        }
        if let Some(transaction) = &reference.transaction_id {
            update = update.col_expr(
                Column::GatewayTransactionId,
                Expr::value(transaction.clone()),
            );
        }
        let result = update
            .filter(Column::Id.eq(order_id))
            .filter(Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            debug!(%order_id, "payment already settled by another call");
            return Ok(false);
        }

        apply_status_if(&txn, order_id, promotion).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// `paymentStatus pending -> failed`, applying `cancellation` to `status`
    /// in the same transaction.
    #[instrument(skip(self))]
    pub async fn fail_payment(
        &self,
        order_id: Uuid,
        cancellation: Option<(OrderStatus, OrderStatus)>,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;

        let result = OrderEntity::update_many()
            .col_expr(Column::PaymentStatus, Expr::value(PaymentStatus::Failed))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(order_id))
            .filter(Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        apply_status_if(&txn, order_id, cancellation).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Moves `status` from `expected` to `to` only if the row still holds
    /// `expected`. `delivered_at` is stamped on delivery.
    #[instrument(skip(self))]
    pub async fn update_status_if(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        to: OrderStatus,
        expected_delivery_date: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let mut update = OrderEntity::update_many()
            .col_expr(Column::Status, Expr::value(to))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1));
        if to == OrderStatus::Delivered {
            update = update.col_expr(Column::DeliveredAt, Expr::value(now));
        }
        if let Some(date) = expected_delivery_date {
            update = update.col_expr(Column::ExpectedDeliveryDate, Expr::value(date));
        }

        let result = update
            .filter(Column::Id.eq(order_id))
            .filter(Column::Status.eq(expected))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Sets the expected delivery date without touching either status axis.
    pub async fn set_expected_delivery_date(
        &self,
        order_id: Uuid,
        date: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(Column::ExpectedDeliveryDate, Expr::value(date))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }
}

async fn apply_status_if<C: ConnectionTrait>(
    db: &C,
    order_id: Uuid,
    change: Option<(OrderStatus, OrderStatus)>,
) -> Result<(), ServiceError> {
    if let Some((from, to)) = change {
        OrderEntity::update_many()
            .col_expr(Column::Status, Expr::value(to))
            .filter(Column::Id.eq(order_id))
            .filter(Column::Status.eq(from))
            .exec(db)
            .await?;
    }
    Ok(())
}

async fn load_one<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Order>, ServiceError> {
    let Some(model) = OrderEntity::find_by_id(id).one(db).await? else {
        return Ok(None);
    };
    let lines = OrderLineItemEntity::find()
        .filter(order_line_item::Column::OrderId.eq(id))
        .all(db)
        .await?;
    Ok(Some(to_domain(model, lines)))
}

fn to_domain(model: order::Model, mut lines: Vec<order_line_item::Model>) -> Order {
    lines.sort_by_key(|line| line.position);

    Order {
        id: model.id,
        owner_id: model.owner_id,
        contact: Contact {
            first_name: model.first_name,
            last_name: model.last_name,
            email: model.email,
            phone: model.phone,
        },
        shipping_address: ShippingAddress {
            address: model.address,
            city: model.city,
            zip_code: model.zip_code,
            state: model.state,
            country: model.country,
        },
        lines: lines
            .into_iter()
            .map(|line| OrderLineItem {
                item_id: line.catalog_item_id,
                name: line.name,
                unit_price: round_money(line.unit_price),
                quantity: u32::try_from(line.quantity).unwrap_or(1),
            })
            .collect(),
        payment_method: model.payment_method,
        payment_status: model.payment_status,
        status: model.status,
        gateway_session_id: model.gateway_session_id,
        gateway_payment_intent_id: model.gateway_payment_intent_id,
        gateway_transaction_id: model.gateway_transaction_id,
        subtotal: round_money(model.subtotal),
        tax: round_money(model.tax),
        shipping: round_money(model.shipping),
        total: round_money(model.total),
        currency: model.currency,
        expected_delivery_date: model.expected_delivery_date,
        delivered_at: model.delivered_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
        version: model.version,
    }
}
