//! Ordered feature columns and the bucket rules deriving indicator columns from raw window fields.

use super::record::{Field, RecordLookup};
use super::RawFeatures;
use crate::error::FeatureExtractionError;
use serde::{Deserialize, Serialize};

/// Continuous window counters, in model order.
pub const DEFAULT_CONTINUOUS_COLUMNS: [&str; 8] = [
    "total_bytes",
    "total_packets",
    "unique_src_ports",
    "flow_count",
    "avg_pkt_size",
    "bytes_per_flow",
    "pkts_per_flow",
    "burstiness",
];

/// Indicator columns, in model order.
pub const DEFAULT_DERIVED_COLUMNS: [&str; 7] = [
    "port_well_known",
    "port_registered",
    "port_dynamic",
    "proto_tcp",
    "proto_udp",
    "proto_icmp",
    "proto_other",
];

/// Raw field holding the destination port of a window.
pub const DST_PORT_FIELD: &str = "dst_port";
/// Raw field holding the protocol code of a window.
pub const PROTO_FIELD: &str = "proto";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortBucket {
    WellKnown,
    Registered,
    Dynamic,
}

impl PortBucket {
    /// Port 0 and anything outside 1..=65535 has no bucket.
    pub fn classify(port: i64) -> Option<Self> {
        match port {
            1..=1023 => Some(PortBucket::WellKnown),
            1024..=49151 => Some(PortBucket::Registered),
            49152..=65535 => Some(PortBucket::Dynamic),
            _ => None,
        }
    }
}

/// Protocol codes as written by the window store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Protocol {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Protocol::Tcp,
            1 => Protocol::Udp,
            2 => Protocol::Icmp,
            _ => Protocol::Other,
        }
    }
}

/// A 0/1 indicator column and the rule producing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedColumn {
    PortWellKnown,
    PortRegistered,
    PortDynamic,
    ProtoTcp,
    ProtoUdp,
    ProtoIcmp,
    ProtoOther,
}

impl DerivedColumn {
    pub const ALL: [DerivedColumn; 7] = [
        DerivedColumn::PortWellKnown,
        DerivedColumn::PortRegistered,
        DerivedColumn::PortDynamic,
        DerivedColumn::ProtoTcp,
        DerivedColumn::ProtoUdp,
        DerivedColumn::ProtoIcmp,
        DerivedColumn::ProtoOther,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DerivedColumn::PortWellKnown => "port_well_known",
            DerivedColumn::PortRegistered => "port_registered",
            DerivedColumn::PortDynamic => "port_dynamic",
            DerivedColumn::ProtoTcp => "proto_tcp",
            DerivedColumn::ProtoUdp => "proto_udp",
            DerivedColumn::ProtoIcmp => "proto_icmp",
            DerivedColumn::ProtoOther => "proto_other",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn indicator(self, port: Option<PortBucket>, proto: Protocol) -> f64 {
        let hit = match self {
            DerivedColumn::PortWellKnown => port == Some(PortBucket::WellKnown),
            DerivedColumn::PortRegistered => port == Some(PortBucket::Registered),
            DerivedColumn::PortDynamic => port == Some(PortBucket::Dynamic),
            DerivedColumn::ProtoTcp => proto == Protocol::Tcp,
            DerivedColumn::ProtoUdp => proto == Protocol::Udp,
            DerivedColumn::ProtoIcmp => proto == Protocol::Icmp,
            DerivedColumn::ProtoOther => proto == Protocol::Other,
        };
        if hit {
            1.0
        } else {
            0.0
        }
    }
}

/// Fixed column order shared by training and inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub continuous: Vec<String>,
    pub derived: Vec<String>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::network()
    }
}

impl FeatureSchema {
    pub fn new(continuous: Vec<String>, derived: Vec<String>) -> Self {
        Self {
            continuous,
            derived,
        }
    }

    /// The traffic-window schema: 8 counters, 3 port buckets, 4 protocol buckets.
    pub fn network() -> Self {
        Self {
            continuous: DEFAULT_CONTINUOUS_COLUMNS.iter().map(|s| s.to_string()).collect(),
            derived: DEFAULT_DERIVED_COLUMNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Length of the model input vector.
    pub fn width(&self) -> usize {
        self.continuous.len() + self.derived.len()
    }

    /// Continuous names followed by derived names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.continuous
            .iter()
            .chain(self.derived.iter())
            .map(String::as_str)
    }

    /// Look up every column by name. Used for inference input, where indicators arrive precomputed
    /// and must be exactly 0 or 1.
    pub fn extract<R: RecordLookup + ?Sized>(
        &self,
        record: &R,
    ) -> Result<RawFeatures, FeatureExtractionError> {
        let continuous = self.lookup_all(record, &self.continuous)?;
        let derived = self.lookup_all(record, &self.derived)?;
        if let Some((column, &value)) = self
            .derived
            .iter()
            .zip(derived.iter())
            .find(|(_, v)| **v != 0.0 && **v != 1.0)
        {
            return Err(FeatureExtractionError::OutOfDomain {
                record: record.record_id(),
                column: column.clone(),
                value,
            });
        }
        Ok(RawFeatures {
            continuous,
            derived,
        })
    }

    /// Look up continuous columns by name and compute indicators from `dst_port` and `proto`.
    pub fn derive<R: RecordLookup + ?Sized>(
        &self,
        record: &R,
    ) -> Result<RawFeatures, FeatureExtractionError> {
        let rules = self
            .derived
            .iter()
            .map(|name| {
                DerivedColumn::from_name(name).ok_or_else(|| {
                    FeatureExtractionError::UnknownDerivedColumn {
                        column: name.clone(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let continuous = self.lookup_all(record, &self.continuous)?;
        let port = PortBucket::classify(integral(record, DST_PORT_FIELD)?);
        let proto = Protocol::from_code(integral(record, PROTO_FIELD)?);
        let derived = rules.iter().map(|r| r.indicator(port, proto)).collect();
        Ok(RawFeatures {
            continuous,
            derived,
        })
    }

    fn lookup_all<R: RecordLookup + ?Sized>(
        &self,
        record: &R,
        columns: &[String],
    ) -> Result<Vec<f64>, FeatureExtractionError> {
        columns.iter().map(|c| required(record, c)).collect()
    }
}

fn required<R: RecordLookup + ?Sized>(
    record: &R,
    column: &str,
) -> Result<f64, FeatureExtractionError> {
    match record.field(column) {
        Field::Number(v) => Ok(v),
        Field::Missing => Err(FeatureExtractionError::MissingColumn {
            record: record.record_id(),
            column: column.to_string(),
        }),
        Field::Invalid(detail) => Err(FeatureExtractionError::NotNumeric {
            record: record.record_id(),
            column: column.to_string(),
            detail,
        }),
    }
}

fn integral<R: RecordLookup + ?Sized>(
    record: &R,
    column: &str,
) -> Result<i64, FeatureExtractionError> {
    let v = required(record, column)?;
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(FeatureExtractionError::NotNumeric {
            record: record.record_id(),
            column: column.to_string(),
            detail: format!("expected an integer code, got {}", v),
        });
    }
    Ok(v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn window(port: f64, proto: f64) -> HashMap<String, f64> {
        let mut m: HashMap<String, f64> = DEFAULT_CONTINUOUS_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), i as f64))
            .collect();
        m.insert(DST_PORT_FIELD.into(), port);
        m.insert(PROTO_FIELD.into(), proto);
        m
    }

    #[test]
    fn port_buckets_are_exclusive() {
        for port in 1i64..=65535 {
            let bucket = PortBucket::classify(port);
            assert!(bucket.is_some(), "port {}", port);
            let hits: f64 = DerivedColumn::ALL[..3]
                .iter()
                .map(|c| c.indicator(bucket, Protocol::Tcp))
                .sum();
            assert_eq!(hits, 1.0, "port {}", port);
        }
        for port in [1i64, 1023, 1024, 49151, 49152, 65535] {
            let raw = FeatureSchema::network()
                .derive(&window(port as f64, 0.0))
                .unwrap();
            let hits: f64 = raw.derived[..3].iter().sum();
            assert_eq!(hits, 1.0, "port {}", port);
        }
    }

    #[test]
    fn port_zero_and_out_of_range_have_no_bucket() {
        for port in [0.0, 65536.0, -5.0] {
            let raw = FeatureSchema::network().derive(&window(port, 0.0)).unwrap();
            assert!(raw.derived[..3].iter().all(|&v| v == 0.0), "port {}", port);
        }
    }

    #[test]
    fn protocol_buckets_are_exclusive() {
        for code in -3..300 {
            let raw = FeatureSchema::network()
                .derive(&window(443.0, code as f64))
                .unwrap();
            let hits: f64 = raw.derived[3..].iter().sum();
            assert_eq!(hits, 1.0, "proto {}", code);
        }
        let raw = FeatureSchema::network().derive(&window(443.0, 17.0)).unwrap();
        assert_eq!(raw.derived[6], 1.0);
    }

    #[test]
    fn missing_column_is_named() {
        let mut w = window(80.0, 0.0);
        w.remove("flow_count");
        let err = FeatureSchema::network().derive(&w).unwrap_err();
        match err {
            FeatureExtractionError::MissingColumn { column, .. } => assert_eq!(column, "flow_count"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn extract_requires_indicator_columns() {
        let w = window(80.0, 0.0);
        let err = FeatureSchema::network().extract(&w).unwrap_err();
        assert!(err.to_string().contains("port_well_known"));
    }

    #[test]
    fn extract_rejects_non_binary_indicator() {
        let mut w = window(80.0, 0.0);
        for c in DEFAULT_DERIVED_COLUMNS {
            w.insert(c.to_string(), 0.0);
        }
        w.insert("port_well_known".into(), 1.0);
        w.insert("proto_tcp".into(), 1.0);
        assert!(FeatureSchema::network().extract(&w).is_ok());

        w.insert("proto_tcp".into(), 7.0);
        match FeatureSchema::network().extract(&w).unwrap_err() {
            FeatureExtractionError::OutOfDomain { column, value, .. } => {
                assert_eq!(column, "proto_tcp");
                assert_eq!(value, 7.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_integer_port_is_rejected() {
        let err = FeatureSchema::network()
            .derive(&window(80.5, 0.0))
            .unwrap_err();
        assert!(matches!(err, FeatureExtractionError::NotNumeric { .. }));
    }

    #[test]
    fn unknown_derived_column_has_no_rule() {
        let schema = FeatureSchema::new(vec![], vec!["is_rare_dst".into()]);
        let err = schema.derive(&window(80.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            FeatureExtractionError::UnknownDerivedColumn { .. }
        ));
    }

    #[test]
    fn column_names_keep_order() {
        let schema = FeatureSchema::network();
        let names: Vec<&str> = schema.column_names().collect();
        assert_eq!(names.len(), 15);
        assert_eq!(names[0], "total_bytes");
        assert_eq!(names[8], "port_well_known");
        assert_eq!(names[14], "proto_other");
    }
}
