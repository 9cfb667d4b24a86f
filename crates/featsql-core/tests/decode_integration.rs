//! Integration tests for compiling a feature type and decoding its rows.

use featsql_core::config::{
    DialectKind, FeatureTypeConfig, PropertyConfig, PropertyType, ProviderConfig, Role,
};
use featsql_core::decode::{decode, FeatureDecoder, GeometryDecoder};
use featsql_core::query::{CompiledQueries, QueryCompiler, TemplateRegistry};
use featsql_core::{DecodeError, Error};
use featsql_proto::{FeatureEvent, QueryRequest, SchemaPath, SqlRow, Value, ValueType};
use pretty_assertions::assert_eq;

fn observation() -> FeatureTypeConfig {
    FeatureTypeConfig::new("observation", "/observation")
        .with_property(PropertyConfig::value("id", PropertyType::Integer, "id").with_role(Role::Id))
        .with_property(PropertyConfig::value("name", PropertyType::String, "name"))
        .with_property(
            PropertyConfig::new("station", PropertyType::Object)
                .with_source_path("[station_fk=id]station")
                .with_property(PropertyConfig::value("name", PropertyType::String, "name")),
        )
        .with_property(
            PropertyConfig::new("readings", PropertyType::ObjectArray)
                .with_source_path("[id=obs_id]reading")
                .with_property(PropertyConfig::value("value", PropertyType::Float, "value")),
        )
        .with_property(PropertyConfig::value(
            "tags",
            PropertyType::ValueArray,
            "[id=obs_id]tag/name",
        ))
}

fn compiled(dialect: DialectKind) -> CompiledQueries {
    let config = ProviderConfig::new(dialect);
    QueryCompiler::new(&config).compile(&observation()).unwrap()
}

fn path(names: &[&str]) -> SchemaPath {
    names.iter().map(|n| n.to_string()).collect()
}

fn value(names: &[&str], value: impl Into<Value>, value_type: ValueType) -> FeatureEvent {
    FeatureEvent::Value {
        path: path(names),
        value: value.into(),
        value_type,
    }
}

/// Raw rows per value query, as a store would return them.
fn raw_rows() -> Vec<Vec<Vec<Value>>> {
    let int = Value::Integer;
    vec![
        vec![
            vec![int(1), int(1), "first".into(), "Bonn".into()],
            vec![int(2), int(2), "second".into(), Value::Null],
        ],
        vec![
            vec![int(1), int(10), Value::Float(0.5)],
            vec![int(1), int(11), Value::Float(1.5)],
        ],
        vec![vec![int(1), int(100), "x".into()], vec![int(2), int(101), "y".into()]],
    ]
}

fn split(queries: &CompiledQueries) -> Vec<std::vec::IntoIter<SqlRow>> {
    queries
        .value_templates()
        .iter()
        .zip(raw_rows())
        .map(|(template, rows)| {
            rows.into_iter()
                .map(|row| template.split_row(row, 0).unwrap())
                .collect::<Vec<_>>()
                .into_iter()
        })
        .collect()
}

#[test]
fn test_one_value_query_per_anchor() {
    let queries = compiled(DialectKind::PostGis);
    assert_eq!(queries.value_templates().len(), 3);

    let request = QueryRequest::new().with_limit(10);
    let sqls = queries.render_values(&request, None).unwrap();
    assert_eq!(
        sqls[0],
        "SELECT A.id AS SKEY, A.id, A.name, B.name FROM observation A LEFT JOIN station B ON (A.station_fk=B.id) ORDER BY 1 LIMIT 10"
    );
    assert_eq!(
        sqls[1],
        "SELECT A.id AS SKEY, B.id AS SKEY_1, B.value FROM observation A JOIN reading B ON (A.id=B.obs_id) WHERE A.id IN (SELECT C.id FROM observation C ORDER BY C.id LIMIT 10) ORDER BY 1,2"
    );
}

#[test]
fn test_decode_page() {
    let queries = compiled(DialectKind::GeoPackage);
    let events: Vec<FeatureEvent> = decode(&queries, &QueryRequest::new(), split(&queries))
        .collect::<Result<_, _>>()
        .unwrap();

    let expected = vec![
        FeatureEvent::FeatureStart { id: Value::Integer(1) },
        value(&["id"], 1, ValueType::Integer),
        value(&["name"], "first", ValueType::String),
        FeatureEvent::ObjectStart { path: path(&["station"]) },
        value(&["station", "name"], "Bonn", ValueType::String),
        FeatureEvent::ObjectEnd { path: path(&["station"]) },
        FeatureEvent::ArrayStart { path: path(&["readings"]) },
        FeatureEvent::ObjectStart { path: path(&["readings"]) },
        value(&["readings", "value"], 0.5, ValueType::Float),
        FeatureEvent::ObjectEnd { path: path(&["readings"]) },
        FeatureEvent::ObjectStart { path: path(&["readings"]) },
        value(&["readings", "value"], 1.5, ValueType::Float),
        FeatureEvent::ObjectEnd { path: path(&["readings"]) },
        FeatureEvent::ArrayEnd { path: path(&["readings"]) },
        FeatureEvent::ArrayStart { path: path(&["tags"]) },
        value(&["tags"], "x", ValueType::String),
        FeatureEvent::ArrayEnd { path: path(&["tags"]) },
        FeatureEvent::FeatureEnd,
        FeatureEvent::FeatureStart { id: Value::Integer(2) },
        value(&["id"], 2, ValueType::Integer),
        value(&["name"], "second", ValueType::String),
        FeatureEvent::ArrayStart { path: path(&["tags"]) },
        value(&["tags"], "y", ValueType::String),
        FeatureEvent::ArrayEnd { path: path(&["tags"]) },
        FeatureEvent::FeatureEnd,
    ];
    assert_eq!(events, expected);
}

struct Counting(usize);

impl GeometryDecoder for Counting {
    fn decode(
        &mut self,
        _path: &SchemaPath,
        _value: &Value,
        _out: &mut Vec<FeatureEvent>,
    ) -> Result<(), DecodeError> {
        self.0 += 1;
        Ok(())
    }
}

#[test]
fn test_custom_geometry_decoder() {
    let config = ProviderConfig::default();
    let feature_type = FeatureTypeConfig::new("place", "/place")
        .with_property(PropertyConfig::value("geom", PropertyType::Geometry, "geom"));
    let queries = QueryCompiler::new(&config).compile(&feature_type).unwrap();
    let template = &queries.value_templates()[0];

    let mut counter = Counting(0);
    {
        let mut decoder = FeatureDecoder::new(queries.layout()).with_geometry_decoder(&mut counter);
        let mut out = Vec::new();
        for key in 1..=3 {
            let row = template
                .split_row(vec![Value::Integer(key), "POINT(1 2)".into()], 0)
                .unwrap();
            decoder.on_row(&row, &mut out).unwrap();
        }
        decoder.finish(&mut out);
        assert_eq!(out.len(), 6);
    }
    assert_eq!(counter.0, 3);
}

#[test]
fn test_registry_rejects_unknown_feature_type() {
    let registry = TemplateRegistry::new(ProviderConfig::default());
    registry.register(&observation()).unwrap();
    assert!(registry.require("observation").is_ok());
    assert!(matches!(
        registry.require("station"),
        Err(Error::Config(featsql_core::ConfigError::UnknownFeatureType(_)))
    ));
}
