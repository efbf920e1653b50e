//! Compiles finalized query descriptors into backend queries.

use entitystore::{Cursor, FinalizedQuery, Property};

use crate::{
    keys::encode_key,
    native::{NativeCursor, NativeQuery, NativeValue, TransactionId},
    properties::native_value,
};

/// Builds the backend query for `fq` in `namespace`, bound to `transaction`
/// when given.
///
/// The descriptor has already been validated, so compilation cannot fail.
/// Filter values the property codec rejects are handed to the backend as-is
/// and left for it to refuse.
pub(crate) fn compile_query(
    fq: &FinalizedQuery,
    namespace: &str,
    transaction: Option<TransactionId>,
) -> NativeQuery {
    let mut q = NativeQuery::new(fq.kind()).namespace(namespace);
    if let Some(id) = transaction {
        q = q.transaction(id);
    }

    for (field, values) in fq.eq_filters() {
        for value in values {
            q = q.filter(format!("{field} ="), native_filter(value));
        }
    }
    for (field, bound) in [fq.ineq_filter_low(), fq.ineq_filter_high()].into_iter().flatten() {
        q = q.filter(format!("{field} {}", bound.op), native_filter(&bound.value));
    }

    let (start, end) = fq.bounds();
    if let Some(start) = start {
        q = q.start(native_cursor(start));
    }
    if let Some(end) = end {
        q = q.end(native_cursor(end));
    }

    if fq.distinct() {
        q = q.distinct();
    }
    if fq.keys_only() {
        q = q.keys_only();
    }
    if let Some(limit) = fq.limit() {
        q = q.limit(limit);
    }
    if let Some(offset) = fq.offset() {
        q = q.offset(offset);
    }
    if !fq.project().is_empty() {
        q = q.project(fq.project());
    }
    if let Some(ancestor) = fq.ancestor() {
        q = q.ancestor(encode_key(ancestor));
    }
    for col in fq.orders() {
        if col.descending {
            q = q.order(format!("-{}", col.property));
        } else {
            q = q.order(col.property.as_str());
        }
    }
    if fq.eventually_consistent() {
        q = q.eventual_consistency();
    }

    tracing::trace!(kind = fq.kind(), filters = q.filters().len(), "compiled query");
    q
}

fn native_filter(prop: &Property) -> NativeValue {
    native_value(prop.value())
}

pub(crate) fn native_cursor(cursor: &Cursor) -> NativeCursor {
    NativeCursor(cursor.as_bytes().clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use entitystore::{BlobKey, GeoPoint, Key, Query};

    use super::*;

    #[test]
    fn test_compiles_every_clause() {
        let ancestor = Key::new("app", "", "Parent", "p", 0, None).unwrap();
        let fq = Query::new("Child")
            .eq("color", Property::indexed("red"))
            .eq("color", Property::indexed("blue"))
            .gte("size", Property::indexed(3i64))
            .lt("size", Property::indexed(9i64))
            .order("size")
            .order_desc("name")
            .ancestor(ancestor.clone())
            .project(["size", "name"])
            .distinct(true)
            .limit(5)
            .offset(2)
            .start(Cursor::from_bytes(vec![1u8]))
            .end(Cursor::from_bytes(vec![9u8]))
            .eventual_consistency(true)
            .finalize()
            .unwrap();

        let q = compile_query(&fq, "ns", Some(TransactionId(7)));

        assert_eq!(q.kind(), "Child");
        assert_eq!(q.namespace_name(), "ns");
        assert_eq!(q.transaction_id(), Some(TransactionId(7)));
        assert_eq!(
            q.filters(),
            &[
                ("color =".to_owned(), NativeValue::String("red".into())),
                ("color =".to_owned(), NativeValue::String("blue".into())),
                ("size >=".to_owned(), NativeValue::Int(3)),
                ("size <".to_owned(), NativeValue::Int(9)),
            ]
        );
        assert_eq!(q.start_cursor().unwrap().0.as_ref(), &[1u8]);
        assert_eq!(q.end_cursor().unwrap().0.as_ref(), &[9u8]);
        assert!(q.is_distinct());
        assert!(!q.is_keys_only());
        assert_eq!(q.limit_value(), Some(5));
        assert_eq!(q.offset_value(), Some(2));
        assert_eq!(q.projection(), &["size".to_owned(), "name".to_owned()]);
        assert_eq!(q.ancestor_key(), Some(&encode_key(&ancestor)));
        assert_eq!(q.orders(), &["size".to_owned(), "-name".to_owned()]);
        assert!(q.is_eventually_consistent());
    }

    #[test]
    fn test_minimal_query_sets_nothing_extra() {
        let fq = Query::new("Thing").finalize().unwrap();
        let q = compile_query(&fq, "", None);

        assert_eq!(q, NativeQuery::new("Thing"));
    }

    #[test]
    fn test_only_low_bound() {
        let fq = Query::new("Thing").gt("n", Property::indexed(1i64)).finalize().unwrap();
        let q = compile_query(&fq, "", None);
        assert_eq!(q.filters(), &[("n >".to_owned(), NativeValue::Int(1))]);
    }

    #[test]
    fn test_unencodable_filter_value_is_passed_through() {
        let fq = Query::new("Place")
            .eq("loc", Property::indexed(GeoPoint { lat: 1.5, lng: -2.0 }))
            .keys_only(true)
            .finalize()
            .unwrap();
        let q = compile_query(&fq, "", None);

        assert_eq!(q.filters(), &[("loc =".to_owned(), NativeValue::GeoPoint { lat: 1.5, lng: -2.0 })]);
        assert!(q.is_keys_only());
    }

    #[test]
    fn test_blob_key_filter_keeps_its_type() {
        let fq = Query::new("Doc")
            .eq("ref", Property::indexed(BlobKey("abc".into())))
            .finalize()
            .unwrap();
        let q = compile_query(&fq, "", None);

        assert_eq!(q.filters(), &[("ref =".to_owned(), NativeValue::BlobKey("abc".into()))]);
    }
}
