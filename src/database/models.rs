//! Row types for the parcel domain, plus the delivery status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

///////////////////////////////////////////////////////////////////////////////
//****                            Customers                              ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

///////////////////////////////////////////////////////////////////////////////
//****                            Couriers                               ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Courier {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub vehicle: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCourier {
    pub name: String,
    pub phone: Option<String>,
    pub vehicle: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

///////////////////////////////////////////////////////////////////////////////
//****                             Parcels                               ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ParcelStatus {
    Registered,
    InTransit,
    Delivered,
    Returned,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Parcel {
    pub id: i64,
    pub customer_id: i64,
    pub description: String,
    pub weight_grams: i64,
    pub status: ParcelStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewParcel {
    pub customer_id: i64,
    pub description: String,
    pub weight_grams: i64,
}

///////////////////////////////////////////////////////////////////////////////
//****                           Deliveries                              ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    /// assigned -> picked_up -> in_transit -> delivered, and any
    /// non-terminal status may fail
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Assigned, PickedUp) | (PickedUp, InTransit) | (InTransit, Delivered) => true,
            _ => false,
        }
    }

    /// Parcel status implied by a delivery reaching this status
    pub fn parcel_status(self) -> ParcelStatus {
        match self {
            DeliveryStatus::Assigned => ParcelStatus::Registered,
            DeliveryStatus::PickedUp | DeliveryStatus::InTransit => ParcelStatus::InTransit,
            DeliveryStatus::Delivered => ParcelStatus::Delivered,
            DeliveryStatus::Failed => ParcelStatus::Returned,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: i64,
    pub parcel_id: i64,
    pub courier_id: i64,
    pub status: DeliveryStatus,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub assigned_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDelivery {
    pub parcel_id: i64,
    pub courier_id: i64,
    pub pickup_address: String,
    pub dropoff_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryStatusUpdate {
    pub status: DeliveryStatus,
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
