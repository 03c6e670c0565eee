use chrono::{Duration, DurationRound, TimeDelta, Utc};
use sea_orm::{DatabaseConnection, Value};
use std::collections::HashMap;

pub use entity::{chunk_status, recording_chunks, recording_status, recordings, Id};

pub mod error;
pub mod query;
pub mod recording;
pub mod recording_chunk;

/// `QueryFilterMap` is a data structure that serves as a bridge for translating filter parameters
/// between different layers of the application. It is essentially a wrapper around a `HashMap`
/// where the keys are filter parameter names (as `String`) and the values are optional `Value` types
/// from `sea_orm`.
///
/// This structure is particularly useful in scenarios where you need to pass filter parameters
/// from a web request down to the database query layer in a type-safe and organized manner.
///
/// # Example
///
/// ```
/// use sea_orm::Value;
/// use entity_api::QueryFilterMap;
///
/// let mut query_filter_map = QueryFilterMap::new();
/// query_filter_map.insert("court_id".to_string(), Some(Value::BigInt(Some(3))));
/// let filter_value = query_filter_map.get("court_id");
/// ```
pub struct QueryFilterMap {
    map: HashMap<String, Option<Value>>,
}

impl QueryFilterMap {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        // HashMap.get returns an Option and so we need to "flatten" this to a single Option
        self.map
            .get(key)
            .and_then(|inner_option| inner_option.clone())
    }

    pub fn insert(&mut self, key: String, value: Option<Value>) {
        self.map.insert(key, value);
    }
}

impl Default for QueryFilterMap {
    fn default() -> Self {
        Self::new()
    }
}

/// `IntoQueryFilterMap` is a trait that provides a method for converting a struct into a `QueryFilterMap`.
/// This is particularly useful for translating data between different layers of the application,
/// such as from web request parameters to database query filters.
///
/// Implementing this trait for a struct allows you to define how the fields of the struct should be
/// mapped to the keys and values of the `QueryFilterMap`. This ensures that the data is passed
/// in a type-safe and organized manner.
///
/// # Example
///
/// ```
/// use entity_api::QueryFilterMap;
/// use entity_api::IntoQueryFilterMap;
///
/// #[derive(Debug)]
/// struct MyParams {
///     court_id: i64,
/// }
///
/// impl IntoQueryFilterMap for MyParams {
///     fn into_query_filter_map(self) -> QueryFilterMap {
///         let mut query_filter_map = QueryFilterMap::new();
///         query_filter_map.insert(
///             "court_id".to_string(),
///             Some(sea_orm::Value::BigInt(Some(self.court_id))),
///         );
///         query_filter_map
///     }
/// }
/// ```
pub trait IntoQueryFilterMap {
    fn into_query_filter_map(self) -> QueryFilterMap;
}

/// Inserts a handful of pending recordings spread over two courts for local development.
pub async fn seed_database(db: &DatabaseConnection) -> Result<(), error::Error> {
    let today = Utc::now()
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or_else(|_| Utc::now());

    let sessions = [
        // facility, court, booking, user, start offset (hours), length (minutes), manual
        (1, 1, Some(1001), Some(501), -3, 45, false),
        (1, 1, Some(1002), Some(502), -2, 60, false),
        (1, 2, None, None, -2, 90, true),
        (2, 5, Some(2001), Some(503), -1, 30, false),
    ];

    for (facility_id, court_id, booking_id, user_id, offset_hours, minutes, manual) in sessions {
        let start = today + Duration::hours(offset_hours);
        let end = start + Duration::minutes(minutes);

        recording::create(
            db,
            recording::NewRecording {
                facility_id,
                court_id,
                booking_id,
                user_id,
                start_time: start.into(),
                end_time: end.into(),
                max_retries: 5,
                is_manual_recording: manual,
            },
        )
        .await?;
    }

    Ok(())
}
