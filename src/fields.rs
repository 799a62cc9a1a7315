//! Text fields with nested key support.
//!
//! Keys are interpreted the way HTML JSON forms do: `pet[name]` nests into an object,
//! `tags[0]` into an array and `tags[]` appends. Keys that can't be parsed are used literally.

use std::{
    collections::{btree_map, BTreeMap},
    fmt,
};

use serde::ser::{Serialize, SerializeMap as _, SerializeSeq as _, Serializer};

/// Array indices above this are treated as object keys.
const MAX_INDEX: usize = 10_000;

/// A value in [`FormFields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),

    /// An array. `None` entries are holes left by sparse indices.
    List(Vec<Option<FieldValue>>),

    Map(FormFields),
}

impl FieldValue {
    /// Returns the text if this is a plain value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Option<FieldValue>]> {
        match self {
            FieldValue::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FormFields> {
        match self {
            FieldValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// Text fields of a form.
///
/// Backed by an ordinary map, so any key is accepted as-is.
///
/// ```
/// use actix_form_upload::FormFields;
///
/// let mut fields = FormFields::new();
/// fields.append("pet[name]", "Hypatia");
/// fields.append("pet[species]", "Dahut");
///
/// let pet = fields.get("pet").unwrap().as_map().unwrap();
/// assert_eq!(pet.get("name").unwrap().as_text(), Some("Hypatia"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(BTreeMap<String, FieldValue>);

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, nesting it according to `key`.
    ///
    /// Repeated keys collect their values into an array.
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        let steps = parse_key(key);

        let first = steps[0].key.to_string();

        let current = self.0.remove(&first);
        let updated = set_value(current, &steps, value.into());
        self.0.insert(first, updated);
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FieldValue> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, FieldValue> {
        self.0
    }
}

impl<'a> IntoIterator for &'a FormFields {
    type Item = (&'a String, &'a FieldValue);
    type IntoIter = btree_map::Iter<'a, String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for FormFields
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = FormFields::new();
        for (key, value) in iter {
            fields.append(key.as_ref(), value);
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Key {
    Name(String),
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Index(idx) => write!(f, "{idx}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    key: Key,
    append: bool,
}

impl Step {
    fn name(name: &str) -> Self {
        Step {
            key: Key::Name(name.to_owned()),
            append: false,
        }
    }
}

/// Splits `a[b][0][]` into steps, falling back to the literal key if malformed.
fn parse_key(key: &str) -> Vec<Step> {
    let literal = || vec![Step::name(key)];

    let first_len = key.find('[').unwrap_or(key.len());
    if first_len == 0 {
        return literal();
    }

    let mut steps = vec![Step::name(&key[..first_len])];
    let mut rest = &key[first_len..];

    while !rest.is_empty() {
        if rest == "[]" {
            if let Some(last) = steps.last_mut() {
                last.append = true;
            }
            break;
        }

        let Some(inner) = rest
            .strip_prefix('[')
            .and_then(|inner| inner.find(']').map(|end| &inner[..end]))
            .filter(|inner| !inner.is_empty())
        else {
            return literal();
        };

        rest = &rest[inner.len() + 2..];

        let key = if inner.bytes().all(|b| b.is_ascii_digit()) {
            match inner.parse::<usize>() {
                Ok(idx) if idx <= MAX_INDEX => Key::Index(idx),
                _ => Key::Name(inner.to_owned()),
            }
        } else {
            Key::Name(inner.to_owned())
        };

        steps.push(Step { key, append: false });
    }

    steps
}

/// Returns the new value for the slot addressed by `steps[0]`, given its `current` value.
fn set_value(current: Option<FieldValue>, steps: &[Step], value: String) -> FieldValue {
    let rest = match steps.split_first() {
        Some((_, rest)) if !rest.is_empty() => rest,
        Some((step, _)) => return set_last(current, step.append, value),
        None => return FieldValue::Text(value),
    };

    match (current, &rest[0].key) {
        (None, &Key::Index(idx)) => set_index(Vec::new(), idx, rest, value),
        (Some(FieldValue::List(list)), &Key::Index(idx)) => set_index(list, idx, rest, value),
        (Some(FieldValue::List(list)), key) => set_key(list_to_map(list), key, rest, value),
        (None, key) => set_key(FormFields::new(), key, rest, value),
        (Some(FieldValue::Map(map)), key) => set_key(map, key, rest, value),
        (Some(FieldValue::Text(text)), key) => {
            let mut map = FormFields::new();
            map.0.insert(String::new(), FieldValue::Text(text));
            set_key(map, key, rest, value)
        }
    }
}

fn set_index(
    mut list: Vec<Option<FieldValue>>,
    idx: usize,
    steps: &[Step],
    value: String,
) -> FieldValue {
    let current = list.get_mut(idx).and_then(Option::take);
    let updated = set_value(current, steps, value);

    if list.len() <= idx {
        list.resize(idx + 1, None);
    }
    list[idx] = Some(updated);

    FieldValue::List(list)
}

fn set_key(mut map: FormFields, key: &Key, steps: &[Step], value: String) -> FieldValue {
    let key = key.to_string();

    let current = map.0.remove(&key);
    let updated = set_value(current, steps, value);
    map.0.insert(key, updated);

    FieldValue::Map(map)
}

fn set_last(current: Option<FieldValue>, append: bool, value: String) -> FieldValue {
    match current {
        None if append => FieldValue::List(vec![Some(FieldValue::Text(value))]),
        None => FieldValue::Text(value),
        Some(FieldValue::List(mut list)) => {
            list.push(Some(FieldValue::Text(value)));
            FieldValue::List(list)
        }
        Some(FieldValue::Map(mut map)) => {
            let current = map.0.remove("");
            map.0.insert(String::new(), set_last(current, false, value));
            FieldValue::Map(map)
        }
        Some(FieldValue::Text(text)) => FieldValue::List(vec![
            Some(FieldValue::Text(text)),
            Some(FieldValue::Text(value)),
        ]),
    }
}

fn list_to_map(list: Vec<Option<FieldValue>>) -> FormFields {
    FormFields(
        list.into_iter()
            .enumerate()
            .filter_map(|(idx, item)| Some((idx.to_string(), item?)))
            .collect(),
    )
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(text) => serializer.serialize_str(text),
            FieldValue::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for item in list {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Map(map) => map.serialize(serializer),
        }
    }
}

impl Serialize for FormFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
