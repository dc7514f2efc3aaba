use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde_json::json;
use shared::{execute_with_retry, RetryPolicy};
use uuid::Uuid;

use crate::db::Db;
use crate::models::*;
use crate::schema::*;

fn not_found() -> anyhow::Error {
    diesel::result::Error::NotFound.into()
}

pub struct CatalogHandler {
    db: Db,
    policy: RetryPolicy,
}

impl CatalogHandler {
    pub fn new(db: Db) -> Self {
        Self { db, policy: RetryPolicy::default() }
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let rows = products::table
                    .order(products::created_at.desc())
                    .load::<Product>(&mut conn)
                    .await?;
                Ok(rows)
            }
        })
        .await
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = products::table
                    .find(id)
                    .first::<Product>(&mut conn)
                    .await
                    .optional()?;
                Ok(row)
            }
        })
        .await
    }

    pub async fn create_product(&self, new_product: NewProduct) -> Result<Product> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let new_product = new_product.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = diesel::insert_into(products::table)
                    .values(&new_product)
                    .get_result::<Product>(&mut conn)
                    .await?;
                Ok(row)
            }
        })
        .await
    }

    pub async fn update_product(&self, id: Uuid, changes: ProductChangeset) -> Result<Product> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let changes = changes.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = diesel::update(products::table.find(id))
                    .set(&changes)
                    .get_result::<Product>(&mut conn)
                    .await?;
                Ok(row)
            }
        })
        .await
    }

    pub async fn delete_product(&self, id: Uuid) -> Result<()> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let affected = diesel::delete(products::table.find(id))
                    .execute(&mut conn)
                    .await?;
                if affected == 0 {
                    return Err(not_found());
                }
                Ok(())
            }
        })
        .await
    }

    pub async fn list_services(&self) -> Result<Vec<Service>> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let rows = services::table
                    .order(services::name.asc())
                    .load::<Service>(&mut conn)
                    .await?;
                Ok(rows)
            }
        })
        .await
    }

    pub async fn create_service(&self, new_service: NewService) -> Result<Service> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let new_service = new_service.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = diesel::insert_into(services::table)
                    .values(&new_service)
                    .get_result::<Service>(&mut conn)
                    .await?;
                Ok(row)
            }
        })
        .await
    }

    pub async fn update_service(&self, id: Uuid, changes: ServiceChangeset) -> Result<Service> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let changes = changes.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = diesel::update(services::table.find(id))
                    .set(&changes)
                    .get_result::<Service>(&mut conn)
                    .await?;
                Ok(row)
            }
        })
        .await
    }

    pub async fn delete_service(&self, id: Uuid) -> Result<()> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let affected = diesel::delete(services::table.find(id))
                    .execute(&mut conn)
                    .await?;
                if affected == 0 {
                    return Err(not_found());
                }
                Ok(())
            }
        })
        .await
    }
}

pub struct BookingHandler {
    db: Db,
    policy: RetryPolicy,
}

impl BookingHandler {
    pub fn new(db: Db) -> Self {
        Self { db, policy: RetryPolicy::default() }
    }

    /// Inserts the booking and its notification atomically, so the feed
    /// never shows a request that was not persisted.
    pub async fn create_booking(&self, new_booking: NewBooking) -> Result<Booking> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let new_booking = new_booking.clone();
            async move {
                let mut conn = db.conn().await?;
                let booking = conn
                    .transaction::<_, anyhow::Error, _>(|conn| {
                        Box::pin(async move {
                            let booking = diesel::insert_into(bookings::table)
                                .values(&new_booking)
                                .get_result::<Booking>(conn)
                                .await?;

                            let notification = NewNotification::new(
                                "booking_request",
                                format!(
                                    "New booking request from {} for {}",
                                    booking.patient_name,
                                    booking.scheduled_for.format("%Y-%m-%d %H:%M")
                                ),
                                json!({ "booking_id": booking.id }),
                            );
                            diesel::insert_into(notifications::table)
                                .values(&notification)
                                .execute(conn)
                                .await?;

                            Ok(booking)
                        })
                    })
                    .await?;
                Ok(booking)
            }
        })
        .await
    }

    pub async fn list_bookings(&self, status: Option<String>) -> Result<Vec<Booking>> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let status = status.clone();
            async move {
                let mut conn = db.conn().await?;
                let mut query = bookings::table.into_boxed();
                if let Some(status) = status {
                    query = query.filter(bookings::status.eq(status));
                }
                let rows = query
                    .order(bookings::scheduled_for.asc())
                    .load::<Booking>(&mut conn)
                    .await?;
                Ok(rows)
            }
        })
        .await
    }

    pub async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = bookings::table
                    .find(id)
                    .first::<Booking>(&mut conn)
                    .await
                    .optional()?;
                Ok(row)
            }
        })
        .await
    }

    pub async fn update_status(&self, id: Uuid, status: String) -> Result<Booking> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let status = status.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = diesel::update(bookings::table.find(id))
                    .set((bookings::status.eq(status), bookings::updated_at.eq(Utc::now())))
                    .get_result::<Booking>(&mut conn)
                    .await?;
                Ok(row)
            }
        })
        .await
    }

    pub async fn delete_booking(&self, id: Uuid) -> Result<()> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let affected = diesel::delete(bookings::table.find(id))
                    .execute(&mut conn)
                    .await?;
                if affected == 0 {
                    return Err(not_found());
                }
                Ok(())
            }
        })
        .await
    }
}

/// One line of an incoming order, before prices are resolved.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub customer_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub lines: Vec<OrderLine>,
}

pub struct OrderHandler {
    db: Db,
    policy: RetryPolicy,
}

impl OrderHandler {
    pub fn new(db: Db) -> Self {
        Self { db, policy: RetryPolicy::default() }
    }

    /// Resolves each line against the catalog, snapshots unit prices,
    /// and writes the order, its items, and the feed notification in a
    /// single transaction. A missing product surfaces as `NotFound`.
    pub async fn create_order(&self, draft: OrderDraft) -> Result<(Order, Vec<OrderItem>)> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let draft = draft.clone();
            async move {
                let mut conn = db.conn().await?;
                let created = conn
                    .transaction::<_, anyhow::Error, _>(|conn| {
                        Box::pin(async move {
                            let order_id = Uuid::new_v4();
                            let mut total = BigDecimal::from(0);
                            let mut items = Vec::with_capacity(draft.lines.len());

                            for line in &draft.lines {
                                let product = products::table
                                    .find(line.product_id)
                                    .first::<Product>(conn)
                                    .await?;
                                total += &product.price * BigDecimal::from(line.quantity);
                                items.push(OrderItem {
                                    id: Uuid::new_v4(),
                                    order_id,
                                    product_id: product.id,
                                    quantity: line.quantity,
                                    unit_price: product.price,
                                });
                            }

                            let new_order = NewOrder {
                                id: order_id,
                                customer_name: draft.customer_name,
                                email: draft.email,
                                phone: draft.phone,
                                status: "pending".to_string(),
                                total_amount: total,
                            };
                            let order = diesel::insert_into(orders::table)
                                .values(&new_order)
                                .get_result::<Order>(conn)
                                .await?;

                            diesel::insert_into(order_items::table)
                                .values(&items)
                                .execute(conn)
                                .await?;

                            let notification = NewNotification::new(
                                "order_placed",
                                format!(
                                    "New order from {} ({} items)",
                                    order.customer_name,
                                    items.len()
                                ),
                                json!({ "order_id": order.id }),
                            );
                            diesel::insert_into(notifications::table)
                                .values(&notification)
                                .execute(conn)
                                .await?;

                            Ok((order, items))
                        })
                    })
                    .await?;
                Ok(created)
            }
        })
        .await
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let rows = orders::table
                    .order(orders::created_at.desc())
                    .load::<Order>(&mut conn)
                    .await?;
                Ok(rows)
            }
        })
        .await
    }

    pub async fn get_order(&self, id: Uuid) -> Result<Option<(Order, Vec<OrderItem>)>> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let order = orders::table
                    .find(id)
                    .first::<Order>(&mut conn)
                    .await
                    .optional()?;
                let Some(order) = order else {
                    return Ok(None);
                };
                let items = order_items::table
                    .filter(order_items::order_id.eq(order.id))
                    .load::<OrderItem>(&mut conn)
                    .await?;
                Ok(Some((order, items)))
            }
        })
        .await
    }

    pub async fn update_status(&self, id: Uuid, status: String) -> Result<Order> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            let status = status.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = diesel::update(orders::table.find(id))
                    .set((orders::status.eq(status), orders::updated_at.eq(Utc::now())))
                    .get_result::<Order>(&mut conn)
                    .await?;
                Ok(row)
            }
        })
        .await
    }

    /// Items go with the order via `ON DELETE CASCADE`.
    pub async fn delete_order(&self, id: Uuid) -> Result<()> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let affected = diesel::delete(orders::table.find(id))
                    .execute(&mut conn)
                    .await?;
                if affected == 0 {
                    return Err(not_found());
                }
                Ok(())
            }
        })
        .await
    }
}

pub struct NotificationHandler {
    db: Db,
    policy: RetryPolicy,
}

impl NotificationHandler {
    pub fn new(db: Db) -> Self {
        Self { db, policy: RetryPolicy::default() }
    }

    pub async fn list(&self, unread_only: bool) -> Result<Vec<Notification>> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let mut query = notifications::table.into_boxed();
                if unread_only {
                    query = query.filter(notifications::read.eq(false));
                }
                let rows = query
                    .order(notifications::created_at.desc())
                    .load::<Notification>(&mut conn)
                    .await?;
                Ok(rows)
            }
        })
        .await
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<Notification> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let row = diesel::update(notifications::table.find(id))
                    .set(notifications::read.eq(true))
                    .get_result::<Notification>(&mut conn)
                    .await?;
                Ok(row)
            }
        })
        .await
    }

    pub async fn mark_all_read(&self) -> Result<usize> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let affected = diesel::update(notifications::table)
                    .filter(notifications::read.eq(false))
                    .set(notifications::read.eq(true))
                    .execute(&mut conn)
                    .await?;
                Ok(affected)
            }
        })
        .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let db = self.db.clone();
        execute_with_retry(&self.db, &self.policy, move || {
            let db = db.clone();
            async move {
                let mut conn = db.conn().await?;
                let affected = diesel::delete(notifications::table.find(id))
                    .execute(&mut conn)
                    .await?;
                if affected == 0 {
                    return Err(not_found());
                }
                Ok(())
            }
        })
        .await
    }
}
