//! # Database Queries Module
//!
//! This module centralizes all database queries used by parcelgate. Each
//! function takes the pool explicitly and returns plain `sqlx::Error`; callers
//! decide how a missing row or a constraint violation surfaces.
//!
//! ## Query Categories
//!
//! - **Customer Queries**: create, list, fetch and delete customers
//! - **Courier Queries**: create, list, fetch and delete couriers
//! - **Parcel Queries**: register, list and fetch parcels
//! - **Delivery Queries**: assign, list, fetch and advance deliveries

use super::models::{
    Courier, Customer, Delivery, DeliveryStatus, NewCourier, NewCustomer, NewDelivery, NewParcel,
    Parcel, ParcelStatus,
};
use chrono::Utc;
use sqlx::sqlite::SqlitePool;

///////////////////////////////////////////////////////////////////////////////
//****                         Customer Queries                          ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn insert_customer(pool: &SqlitePool, new: &NewCustomer) -> Result<Customer, sqlx::Error> {
    let id = sqlx::query("INSERT INTO customers (name, email, phone, created_at) VALUES (?, ?, ?, ?)")
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(Utc::now())
        .execute(pool)
        .await?
        .last_insert_rowid();

    fetch_customer(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn fetch_customer(pool: &SqlitePool, id: i64) -> Result<Option<Customer>, sqlx::Error> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_all_customers(pool: &SqlitePool) -> Result<Vec<Customer>, sqlx::Error> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers ORDER BY id")
        .fetch_all(pool)
        .await
}

/// Returns false when no such customer existed
pub async fn delete_customer(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM customers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

///////////////////////////////////////////////////////////////////////////////
//****                          Courier Queries                          ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn insert_courier(pool: &SqlitePool, new: &NewCourier) -> Result<Courier, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO couriers (name, phone, vehicle, active, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&new.name)
    .bind(&new.phone)
    .bind(&new.vehicle)
    .bind(new.active)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    fetch_courier(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn fetch_courier(pool: &SqlitePool, id: i64) -> Result<Option<Courier>, sqlx::Error> {
    sqlx::query_as::<_, Courier>("SELECT * FROM couriers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_all_couriers(pool: &SqlitePool) -> Result<Vec<Courier>, sqlx::Error> {
    sqlx::query_as::<_, Courier>("SELECT * FROM couriers ORDER BY id")
        .fetch_all(pool)
        .await
}

pub async fn delete_courier(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM couriers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

///////////////////////////////////////////////////////////////////////////////
//****                           Parcel Queries                          ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn insert_parcel(pool: &SqlitePool, new: &NewParcel) -> Result<Parcel, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO parcels (customer_id, description, weight_grams, status, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(new.customer_id)
    .bind(&new.description)
    .bind(new.weight_grams)
    .bind(ParcelStatus::Registered)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    fetch_parcel(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn fetch_parcel(pool: &SqlitePool, id: i64) -> Result<Option<Parcel>, sqlx::Error> {
    sqlx::query_as::<_, Parcel>("SELECT * FROM parcels WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// All parcels, or only those of one customer
pub async fn fetch_parcels(
    pool: &SqlitePool,
    customer_id: Option<i64>,
) -> Result<Vec<Parcel>, sqlx::Error> {
    match customer_id {
        Some(customer_id) => {
            sqlx::query_as::<_, Parcel>("SELECT * FROM parcels WHERE customer_id = ? ORDER BY id")
                .bind(customer_id)
                .fetch_all(pool)
                .await
        }
        None => {
            sqlx::query_as::<_, Parcel>("SELECT * FROM parcels ORDER BY id")
                .fetch_all(pool)
                .await
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                          Delivery Queries                         ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn insert_delivery(pool: &SqlitePool, new: &NewDelivery) -> Result<Delivery, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO deliveries (parcel_id, courier_id, status, pickup_address, dropoff_address, assigned_at)
        VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(new.parcel_id)
    .bind(new.courier_id)
    .bind(DeliveryStatus::Assigned)
    .bind(&new.pickup_address)
    .bind(&new.dropoff_address)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    fetch_delivery(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn fetch_delivery(pool: &SqlitePool, id: i64) -> Result<Option<Delivery>, sqlx::Error> {
    sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// All deliveries, or only those assigned to one courier
pub async fn fetch_deliveries(
    pool: &SqlitePool,
    courier_id: Option<i64>,
) -> Result<Vec<Delivery>, sqlx::Error> {
    match courier_id {
        Some(courier_id) => {
            sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE courier_id = ? ORDER BY id")
                .bind(courier_id)
                .fetch_all(pool)
                .await
        }
        None => {
            sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries ORDER BY id")
                .fetch_all(pool)
                .await
        }
    }
}

/// Move a delivery to `status` and its parcel to the matching parcel status.
///
/// Both rows change in one transaction. Transition rules are the caller's job.
pub async fn update_delivery_status(
    pool: &SqlitePool,
    delivery: &Delivery,
    status: DeliveryStatus,
) -> Result<Delivery, sqlx::Error> {
    let delivered_at = (status == DeliveryStatus::Delivered).then(Utc::now);

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE deliveries SET status = ?, delivered_at = COALESCE(?, delivered_at) WHERE id = ?")
        .bind(status)
        .bind(delivered_at)
        .bind(delivery.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE parcels SET status = ? WHERE id = ?")
        .bind(status.parcel_status())
        .bind(delivery.parcel_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    fetch_delivery(pool, delivery.id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
