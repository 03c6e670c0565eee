use crate::QueryFilterMap;
use sea_orm::strum::IntoEnumIterator;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

/// Builds a select on `E` filtered by every column present in `query_filter_map`.
pub(crate) fn filtered<E, C>(query_filter_map: QueryFilterMap) -> sea_orm::Select<E>
where
    E: EntityTrait<Column = C>,
    C: ColumnTrait + IntoEnumIterator,
{
    let mut query = E::find();

    // We iterate through the entity's defined columns so that we only attempt
    // to filter by columns that exist.
    for column in C::iter() {
        if let Some(value) = query_filter_map.get(&column.to_string()) {
            query = query.filter(column.eq(value));
        }
    }

    query
}
