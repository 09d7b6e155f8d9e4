//! Record schemas and field-order resolution.
//!
//! Every record encodes its fields in declared order. Decoding is either
//! positional ([`Record::decode`]) or resolving ([`Record::decode_resolving`]),
//! where a [`FieldOrder`] derived from the writer's schema says which logical
//! slot each field on the wire belongs to.

use std::marker::PhantomData;

use serde::Deserialize;
use tokio_util::bytes::Bytes;

use super::DecodeError;
use super::wire::{Reader, Writer};

/// A fixed Avro record schema.
pub trait Record: Default + Sized {
    /// Record name, used in diagnostics.
    const NAME: &'static str;
    /// Logical field names in declared order. A field's index is its slot.
    const FIELDS: &'static [&'static str];

    fn encode(&self, w: &mut Writer);

    /// Decode the field for `slot` into `self`.
    fn decode_field(&mut self, slot: usize, r: &mut Reader<'_>) -> Result<(), DecodeError>;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut value = Self::default();
        for slot in 0..Self::FIELDS.len() {
            value.decode_field(slot, r)?;
        }
        Ok(value)
    }

    /// Decode fields in the order the writer sent them. Slots the writer never
    /// sends keep their default.
    fn decode_resolving(r: &mut Reader<'_>, order: &FieldOrder<Self>) -> Result<Self, DecodeError> {
        let mut value = Self::default();
        for &slot in order.slots() {
            value.decode_field(slot, r)?;
        }
        Ok(value)
    }
}

fn unknown_slot<R: Record>(slot: usize) -> DecodeError {
    DecodeError::UnknownField {
        record: R::NAME,
        field: format!("#{slot}"),
    }
}

/// Wire field order for record `R`, resolved out-of-band.
///
/// Construction validates every writer field against `R::FIELDS`, so decoding
/// with a `FieldOrder` can never land in an unknown slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOrder<R> {
    slots: Vec<usize>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> FieldOrder<R> {
    /// The reader's own declared order (equivalent to positional decode).
    pub fn declared() -> Self {
        Self {
            slots: (0..R::FIELDS.len()).collect(),
            _record: PhantomData,
        }
    }

    /// Resolve the writer's field names, in wire order, to reader slots.
    pub fn from_writer_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, DecodeError> {
        let mut slots = Vec::with_capacity(fields.len());
        for field in fields {
            let name = field.as_ref();
            let slot = R::FIELDS
                .iter()
                .position(|f| *f == name)
                .ok_or_else(|| DecodeError::UnknownField {
                    record: R::NAME,
                    field: name.to_string(),
                })?;
            if slots.contains(&slot) {
                return Err(DecodeError::DuplicateField {
                    field: name.to_string(),
                });
            }
            slots.push(slot);
        }
        Ok(Self {
            slots,
            _record: PhantomData,
        })
    }

    /// Resolve from the writer's Avro JSON schema: either a record, or a
    /// single-branch union around one (the `.avsc` shape the service ships).
    pub fn from_writer_schema(schema: &str) -> Result<Self, DecodeError> {
        let doc: WriterSchemaDoc =
            serde_json::from_str(schema).map_err(|e| DecodeError::InvalidSchema(e.to_string()))?;
        let record = match doc {
            WriterSchemaDoc::Record(record) => record,
            WriterSchemaDoc::Union(mut branches) if branches.len() == 1 => branches.remove(0),
            WriterSchemaDoc::Union(branches) => {
                return Err(DecodeError::InvalidSchema(format!(
                    "expected a single-branch union, found {} branches",
                    branches.len()
                )));
            }
        };
        if record.kind != "record" {
            return Err(DecodeError::InvalidSchema(format!(
                "expected a record schema, found '{}'",
                record.kind
            )));
        }
        let names: Vec<&str> = record.fields.iter().map(|f| f.name.as_str()).collect();
        Self::from_writer_fields(&names)
    }

    pub fn slots(&self) -> &[usize] {
        &self.slots
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WriterSchemaDoc {
    Record(WriterRecord),
    Union(Vec<WriterRecord>),
}

#[derive(Deserialize)]
struct WriterRecord {
    #[serde(rename = "type")]
    kind: String,
    fields: Vec<WriterField>,
}

#[derive(Deserialize)]
struct WriterField {
    name: String,
}

/// Payload of an R or Julia task request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSpec {
    /// Correlation id.
    pub uuid: String,
    /// Function or script source.
    pub function: String,
    /// Opaque input data.
    pub data: Bytes,
}

impl TaskSpec {
    pub fn new(uuid: impl Into<String>, function: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            uuid: uuid.into(),
            function: function.into(),
            data: data.into(),
        }
    }
}

impl Record for TaskSpec {
    const NAME: &'static str = "TaskMsg";
    const FIELDS: &'static [&'static str] = &["uuid", "function", "data"];

    fn encode(&self, w: &mut Writer) {
        w.put_str(&self.uuid);
        w.put_str(&self.function);
        w.put_bytes(&self.data);
    }

    fn decode_field(&mut self, slot: usize, r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match slot {
            0 => self.uuid = r.get_string("uuid")?,
            1 => self.function = r.get_string("function")?,
            2 => self.data = r.get_bytes()?,
            _ => return Err(unknown_slot::<Self>(slot)),
        }
        Ok(())
    }
}

/// Result of one task, correlated by `uuid`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskResult {
    pub uuid: String,
    pub value: Bytes,
}

impl TaskResult {
    pub fn new(uuid: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            uuid: uuid.into(),
            value: value.into(),
        }
    }
}

impl Record for TaskResult {
    const NAME: &'static str = "ResultsMsg";
    const FIELDS: &'static [&'static str] = &["uuid", "value"];

    fn encode(&self, w: &mut Writer) {
        w.put_str(&self.uuid);
        w.put_bytes(&self.value);
    }

    fn decode_field(&mut self, slot: usize, r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match slot {
            0 => self.uuid = r.get_string("uuid")?,
            1 => self.value = r.get_bytes()?,
            _ => return Err(unknown_slot::<Self>(slot)),
        }
        Ok(())
    }
}

/// Sentinel asking the service to stop. Not user data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSignal {
    pub command: i32,
}

impl Record for ShutdownSignal {
    const NAME: &'static str = "ShutdownMsg";
    const FIELDS: &'static [&'static str] = &["command"];

    fn encode(&self, w: &mut Writer) {
        w.put_int(self.command);
    }

    fn decode_field(&mut self, slot: usize, r: &mut Reader<'_>) -> Result<(), DecodeError> {
        match slot {
            0 => self.command = r.get_int()?,
            _ => return Err(unknown_slot::<Self>(slot)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_order_is_identity() {
        assert_eq!(FieldOrder::<TaskSpec>::declared().slots(), &[0, 1, 2]);
    }

    #[test]
    fn writer_fields_map_to_slots() {
        let order = FieldOrder::<TaskSpec>::from_writer_fields(&["data", "uuid", "function"]).unwrap();
        assert_eq!(order.slots(), &[2, 0, 1]);
    }

    #[test]
    fn unknown_writer_field_rejected() {
        let err = FieldOrder::<TaskResult>::from_writer_fields(&["uuid", "elapsed"]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownField {
                record: "ResultsMsg",
                field: "elapsed".to_string()
            }
        );
    }

    #[test]
    fn duplicate_writer_field_rejected() {
        let err = FieldOrder::<TaskResult>::from_writer_fields(&["uuid", "uuid"]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::DuplicateField {
                field: "uuid".to_string()
            }
        );
    }

    #[test]
    fn writer_schema_record() {
        let schema = r#"{
            "type": "record",
            "name": "Org.Apache.REEF.Fluid.Message.RResultsMsg",
            "fields": [
                {"name": "value", "type": "string"},
                {"name": "uuid", "type": "string"}
            ]
        }"#;
        let order = FieldOrder::<TaskResult>::from_writer_schema(schema).unwrap();
        assert_eq!(order.slots(), &[1, 0]);
    }

    #[test]
    fn writer_schema_single_branch_union() {
        let schema = r#"[{"type":"record","name":"ShutdownMsg","fields":[{"name":"command","type":"int"}]}]"#;
        let order = FieldOrder::<ShutdownSignal>::from_writer_schema(schema).unwrap();
        assert_eq!(order.slots(), &[0]);
    }

    #[test]
    fn writer_schema_must_be_a_record() {
        assert!(matches!(
            FieldOrder::<ShutdownSignal>::from_writer_schema(r#"{"type":"enum","fields":[]}"#),
            Err(DecodeError::InvalidSchema(_))
        ));
        assert!(matches!(
            FieldOrder::<ShutdownSignal>::from_writer_schema("not json"),
            Err(DecodeError::InvalidSchema(_))
        ));
    }

    #[test]
    fn resolving_decode_assigns_by_name() {
        let mut w = Writer::new();
        w.put_bytes(b"payload");
        w.put_str("abc-123");
        w.put_str("mean(x)");
        let bytes = w.finish();

        let order = FieldOrder::<TaskSpec>::from_writer_fields(&["data", "uuid", "function"]).unwrap();
        let mut r = Reader::new(&bytes);
        let spec = <TaskSpec as Record>::decode_resolving(&mut r, &order).unwrap();
        r.finish().unwrap();

        assert_eq!(spec, TaskSpec::new("abc-123", "mean(x)", &b"payload"[..]));
    }

    #[test]
    fn resolving_decode_defaults_missing_fields() {
        let mut w = Writer::new();
        w.put_str("only-id");
        let bytes = w.finish();

        let order = FieldOrder::<TaskResult>::from_writer_fields(&["uuid"]).unwrap();
        let mut r = Reader::new(&bytes);
        let result = <TaskResult as Record>::decode_resolving(&mut r, &order).unwrap();
        assert_eq!(result.uuid, "only-id");
        assert!(result.value.is_empty());
    }
}
