use std::collections::HashMap;

use crate::attribute_value::AttributeValue;

const FLOAT_TO_INT_MAX: f64 = 9007199254740991_f64;

/// Converting float to int has undefined behaviour for huge floats:
/// https://stackoverflow.com/a/41139453. Floats with a magnitude above 2**53 - 1 no longer retain
/// integer precision and are refused.
pub(crate) fn f64_to_i64_safe(f: f64) -> Option<i64> {
    if f.abs() <= FLOAT_TO_INT_MAX {
        Some(f as i64)
    } else {
        None
    }
}

/// Walks a dot-separated path (`company.address.city`) through nested object attributes.
///
/// A path without dots is a plain top-level lookup. Any segment that is missing, or that has to
/// descend into something other than an object, yields None.
pub(crate) fn lookup_path<'a>(
    attributes: &'a HashMap<String, AttributeValue>,
    path: &str,
) -> Option<&'a AttributeValue> {
    if let Some(value) = attributes.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = attributes.get(segments.next()?)?;
    for segment in segments {
        match current {
            AttributeValue::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn lookup_path_descends_into_objects() {
        let attributes = hashmap! {
            "company".to_string() => AttributeValue::Object(hashmap! {
                "name".to_string() => AttributeValue::from("acme"),
                "address".to_string() => AttributeValue::Object(hashmap! {
                    "city".to_string() => AttributeValue::from("Paris"),
                }),
            }),
            "plain".to_string() => AttributeValue::from(1_i64),
            "dotted.key".to_string() => AttributeValue::from(true),
        };

        assert_eq!(
            lookup_path(&attributes, "company.address.city"),
            Some(&AttributeValue::from("Paris"))
        );
        assert_eq!(
            lookup_path(&attributes, "plain"),
            Some(&AttributeValue::Number(1.0))
        );
        assert_eq!(
            lookup_path(&attributes, "dotted.key"),
            Some(&AttributeValue::Bool(true))
        );
        assert_eq!(lookup_path(&attributes, "plain.deeper"), None);
        assert_eq!(lookup_path(&attributes, "company.missing"), None);
        assert_eq!(lookup_path(&attributes, "missing"), None);
    }

    #[test]
    fn float_bounds() {
        assert_eq!(f64_to_i64_safe(1.99), Some(1));
        assert_eq!(f64_to_i64_safe(-9007199254740991.0), Some(-9007199254740991));
        assert_eq!(f64_to_i64_safe(9007199254740992.0), None);
    }
}
