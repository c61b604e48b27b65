//! Query translation from docset queries to MongoDB find commands.
//!
//! Filters become a `$and` of per-field comparisons. The start cursor is expressed
//! as an extra `$gte` (ascending) or `$lte` (descending) bound on the ordering
//! field, and ties in the ordering are broken by `_id`.

use bson::{Bson, Document, doc};

use docset_core::{
    entity::ID_FIELD,
    error::DocSetError,
    query::{FieldOp, FilterVisitor, Query, SortDirection},
};

use crate::sanitizer::KeySanitizer;

/// Name of the MongoDB primary key.
pub(crate) const MONGO_ID_FIELD: &str = "_id";

/// Maps a public field path onto its stored MongoDB path.
pub(crate) fn stored_path(field: &str) -> String {
    if field == ID_FIELD {
        MONGO_ID_FIELD.to_string()
    } else {
        KeySanitizer::sanitize_path(field)
    }
}

/// Translates filters into MongoDB comparison documents.
pub(crate) struct MongoQueryTranslator;

impl FilterVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocSetError;

    fn visit_filter(&mut self, field: &str, op: FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        if field.is_empty() {
            return Err(DocSetError::Query("filter on an empty field name".to_string()));
        }

        let operator = match op {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
        };

        Ok(doc! {
            stored_path(field): { operator: value.clone() },
        })
    }
}

/// A translated find command.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FindCommand {
    pub filter: Document,
    pub sort: Option<Document>,
    pub limit: Option<i64>,
}

impl FindCommand {
    pub(crate) fn from_query(query: &Query) -> Result<Self, DocSetError> {
        let mut clauses = MongoQueryTranslator.visit_filters(&query.filters)?;

        let sort = match &query.order_by {
            Some(sort) => {
                let path = stored_path(&sort.field);
                let direction = match sort.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                };

                if let Some(start_at) = &query.start_at {
                    let bound = match sort.direction {
                        SortDirection::Asc => "$gte",
                        SortDirection::Desc => "$lte",
                    };
                    clauses.push(doc! { path.clone(): { bound: start_at.clone() } });
                }

                let mut sort = doc! { path.clone(): direction };
                if path != MONGO_ID_FIELD {
                    sort.insert(MONGO_ID_FIELD, 1);
                }
                Some(sort)
            }
            None if query.start_at.is_some() => {
                return Err(DocSetError::Query("a start cursor requires an ordering".to_string()));
            }
            None => None,
        };

        let filter = match clauses.len() {
            0 => doc! {},
            1 => clauses.remove(0),
            _ => doc! { "$and": clauses },
        };

        Ok(Self {
            filter,
            sort,
            limit: query.limit.map(|limit| limit as i64),
        })
    }
}

#[cfg(test)]
mod tests {
    use docset_core::query::Filter;

    use super::*;

    #[test]
    fn single_filters_are_not_wrapped() {
        let query = Query::builder().filter(Filter::eq("status", "open")).build();
        let find = FindCommand::from_query(&query).unwrap();

        assert_eq!(find.filter, doc! { "status": { "$eq": "open" } });
        assert_eq!(find.sort, None);
        assert_eq!(find.limit, None);
    }

    #[test]
    fn ids_map_to_the_primary_key() {
        let query = Query::builder().filter(Filter::ne("id", "a")).build();

        assert_eq!(FindCommand::from_query(&query).unwrap().filter, doc! { "_id": { "$ne": "a" } });
    }

    #[test]
    fn cursors_become_bounds_on_the_ordering_field() {
        let query = Query::builder()
            .filter(Filter::eq("status", "open"))
            .order_by("documentPosition", SortDirection::Desc)
            .start_at(10)
            .limit(5)
            .build();

        let find = FindCommand::from_query(&query).unwrap();
        assert_eq!(
            find.filter,
            doc! { "$and": [
                { "status": { "$eq": "open" } },
                { "documentPosition": { "$lte": 10 } },
            ] }
        );
        assert_eq!(find.sort, Some(doc! { "documentPosition": -1, "_id": 1 }));
        assert_eq!(find.limit, Some(5));
    }

    #[test]
    fn cursor_without_ordering_is_rejected() {
        let query = Query::builder().start_at(1).build();

        assert!(matches!(FindCommand::from_query(&query), Err(DocSetError::Query(_))));
    }
}
