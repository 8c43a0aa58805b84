//! Row representation exchanged with the executor: a tuple descriptor plus an
//! array of optional datums.

use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

/// Column types understood by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Boolean.
    Bool,
    /// Single signed byte.
    Char,
    /// Two-byte integer.
    Int2,
    /// Four-byte integer.
    Int4,
    /// Eight-byte integer.
    Int8,
    /// Single precision float.
    Float4,
    /// Double precision float.
    Float8,
    /// Days since the epoch.
    Date,
    /// Microseconds since the epoch.
    Timestamp,
    /// Unbounded text.
    Text,
    /// Length-limited text.
    Varchar,
    /// Blank-padded fixed length text.
    BpChar,
    /// Byte string.
    Bytea,
    /// 16-byte fixed width value passed by reference.
    Uuid,
    /// Pass-by-reference internal type with no on-disk representation.
    Internal,
}

impl ColumnType {
    /// Fixed width in bytes, `None` for variable length types.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            ColumnType::Bool | ColumnType::Char => Some(1),
            ColumnType::Int2 => Some(2),
            ColumnType::Int4 | ColumnType::Float4 | ColumnType::Date => Some(4),
            ColumnType::Int8 | ColumnType::Float8 | ColumnType::Timestamp => Some(8),
            ColumnType::Uuid => Some(16),
            ColumnType::Text
            | ColumnType::Varchar
            | ColumnType::BpChar
            | ColumnType::Bytea
            | ColumnType::Internal => None,
        }
    }

    /// Whether values are passed by value (fixed width of at most 8 bytes).
    pub fn is_by_value(&self) -> bool {
        matches!(self.fixed_len(), Some(len) if len <= 8)
    }

    /// Whether values are text.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ColumnType::Text | ColumnType::Varchar | ColumnType::BpChar
        )
    }

    /// Type name written to file metadata.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Char => "char",
            ColumnType::Int2 => "int2",
            ColumnType::Int4 => "int4",
            ColumnType::Int8 => "int8",
            ColumnType::Float4 => "float4",
            ColumnType::Float8 => "float8",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
            ColumnType::Varchar => "varchar",
            ColumnType::BpChar => "bpchar",
            ColumnType::Bytea => "bytea",
            ColumnType::Uuid => "uuid",
            ColumnType::Internal => "internal",
        }
    }

    /// Whether `datum` is a legal value for a column of this type.
    pub fn accepts(&self, datum: &Datum) -> bool {
        matches!(
            (self, datum),
            (ColumnType::Bool, Datum::Bool(_))
                | (ColumnType::Char, Datum::Char(_))
                | (ColumnType::Int2, Datum::Int2(_))
                | (ColumnType::Int4, Datum::Int4(_))
                | (ColumnType::Int8, Datum::Int8(_))
                | (ColumnType::Float4, Datum::Float4(_))
                | (ColumnType::Float8, Datum::Float8(_))
                | (ColumnType::Date, Datum::Date(_))
                | (ColumnType::Timestamp, Datum::Timestamp(_))
                | (
                    ColumnType::Text | ColumnType::Varchar | ColumnType::BpChar,
                    Datum::Text(_)
                )
                | (ColumnType::Bytea, Datum::Bytea(_))
                | (ColumnType::Uuid, Datum::Uuid(_))
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One non-null column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    /// Boolean.
    Bool(bool),
    /// Single signed byte.
    Char(i8),
    /// Two-byte integer.
    Int2(i16),
    /// Four-byte integer.
    Int4(i32),
    /// Eight-byte integer.
    Int8(i64),
    /// Single precision float.
    Float4(f32),
    /// Double precision float.
    Float8(f64),
    /// Days since the epoch.
    Date(i32),
    /// Microseconds since the epoch.
    Timestamp(i64),
    /// Text of any textual column type.
    Text(String),
    /// Byte string.
    Bytea(Vec<u8>),
    /// 16-byte identifier.
    Uuid([u8; 16]),
}

impl Datum {
    /// Approximate in-memory footprint, used for memory budgeting.
    pub fn size_hint(&self) -> usize {
        match self {
            Datum::Text(s) => s.len() + std::mem::size_of::<String>(),
            Datum::Bytea(b) => b.len() + std::mem::size_of::<Vec<u8>>(),
            _ => std::mem::size_of::<Datum>(),
        }
    }

    /// Total order between two datums of the same column. NaN sorts equal to
    /// itself and above every other float. Mismatched variants compare by
    /// variant so the order stays total.
    pub fn total_cmp(&self, other: &Datum, collation: Collation) -> Ordering {
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Char(a), Datum::Char(b)) => a.cmp(b),
            (Datum::Int2(a), Datum::Int2(b)) => a.cmp(b),
            (Datum::Int4(a), Datum::Int4(b)) => a.cmp(b),
            (Datum::Int8(a), Datum::Int8(b)) => a.cmp(b),
            (Datum::Float4(a), Datum::Float4(b)) => float_cmp(f64::from(*a), f64::from(*b)),
            (Datum::Float8(a), Datum::Float8(b)) => float_cmp(*a, *b),
            (Datum::Date(a), Datum::Date(b)) => a.cmp(b),
            (Datum::Timestamp(a), Datum::Timestamp(b)) => a.cmp(b),
            (Datum::Text(a), Datum::Text(b)) => match collation {
                Collation::C => a.as_bytes().cmp(b.as_bytes()),
                Collation::CaseInsensitive => a
                    .chars()
                    .flat_map(char::to_lowercase)
                    .cmp(b.chars().flat_map(char::to_lowercase))
                    .then_with(|| a.as_bytes().cmp(b.as_bytes())),
            },
            (Datum::Bytea(a), Datum::Bytea(b)) => a.cmp(b),
            (Datum::Uuid(a), Datum::Uuid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Datum::Bool(_) => 0,
            Datum::Char(_) => 1,
            Datum::Int2(_) => 2,
            Datum::Int4(_) => 3,
            Datum::Int8(_) => 4,
            Datum::Float4(_) => 5,
            Datum::Float8(_) => 6,
            Datum::Date(_) => 7,
            Datum::Timestamp(_) => 8,
            Datum::Text(_) => 9,
            Datum::Bytea(_) => 10,
            Datum::Uuid(_) => 11,
        }
    }
}

fn float_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Text comparison rule used by sort keys and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collation {
    /// Plain byte order.
    #[default]
    C,
    /// Byte order after ASCII lowercasing.
    CaseInsensitive,
}

/// Compare two nullable values, placing nulls first or last.
pub fn cmp_nullable(
    a: Option<&Datum>,
    b: Option<&Datum>,
    nulls_first: bool,
    collation: Collation,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => {
            if nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (Some(_), None) => {
            if nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Some(a), Some(b)) => a.total_cmp(b, collation),
    }
}

/// One column of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Column name.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
    /// Dropped columns keep their slot in rows but are never stored.
    pub dropped: bool,
}

impl Attribute {
    /// Live column `name` of type `ty`.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            dropped: false,
        }
    }

    /// Mark the column dropped. Dropped columns are not stored.
    pub fn dropped(mut self) -> Self {
        self.dropped = true;
        self
    }
}

/// Schema descriptor of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TupleDesc {
    attrs: Vec<Attribute>,
}

impl TupleDesc {
    /// Descriptor over `attrs`.
    pub fn new(attrs: Vec<Attribute>) -> Self {
        Self { attrs }
    }

    /// Every column, dropped ones included.
    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    /// Number of columns.
    pub fn natts(&self) -> usize {
        self.attrs.len()
    }

    /// Column `index`, if any.
    pub fn attr(&self, index: usize) -> Option<&Attribute> {
        self.attrs.get(index)
    }

    /// Position of the live column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.attrs
            .iter()
            .position(|attr| !attr.dropped && attr.name == name)
    }

    /// Copy of this descriptor with one extra trailing column.
    pub fn with_extra(&self, attr: Attribute) -> Self {
        let mut attrs = self.attrs.clone();
        attrs.push(attr);
        Self { attrs }
    }
}

/// A row: one optional datum per attribute, `None` meaning SQL null.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<Option<Datum>>);

impl Row {
    /// Row with `values`.
    pub fn new(values: Vec<Option<Datum>>) -> Self {
        Self(values)
    }

    /// Every value, `None` for null.
    pub fn values(&self) -> &[Option<Datum>] {
        &self.0
    }

    /// Value of column `index`, `None` when null or out of range.
    pub fn get(&self, index: usize) -> Option<&Datum> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a value.
    pub fn push(&mut self, value: Option<Datum>) {
        self.0.push(value);
    }

    /// Take the values.
    pub fn into_values(self) -> Vec<Option<Datum>> {
        self.0
    }

    /// Approximate in-memory footprint of the row.
    pub fn size_hint(&self) -> usize {
        std::mem::size_of::<Row>()
            + self
                .0
                .iter()
                .map(|v| v.as_ref().map_or(std::mem::size_of::<Option<Datum>>(), Datum::size_hint))
                .sum::<usize>()
    }
}

impl From<Vec<Option<Datum>>> for Row {
    fn from(values: Vec<Option<Datum>>) -> Self {
        Self(values)
    }
}
