//! Schema tree: an arena of property nodes and the tables they read from.
//!
//! Property nodes mirror the configured property hierarchy. Table nodes are
//! derived from the source paths: every distinct relation chain becomes one
//! table node, shared by all properties whose paths reach the same table,
//! with intermediate tables synthesized for chains that pass through tables
//! without columns of their own.

use featsql_proto::{Expr, SchemaPath, TablePath, ValueType};
use regex::Regex;
use tracing::debug;

use super::path::{parse_relative_path, parse_root_path, SourcePath, TableSegment};
use super::relation::{Cardinality, Junction, Relation, TableRef};
use super::FilterParser;
use crate::config::{FeatureTypeConfig, PropertyConfig, PropertyType, ProviderConfig, Role};
use crate::error::ConfigError;

/// Handle of a property node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle of a table node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub(crate) usize);

impl TableId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Shape of a property node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Value,
    Object,
    ArrayOfValue,
    ArrayOfObject,
}

/// Where the value of a node comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    /// Structural node, no value of its own.
    None,
    Column(String),
    /// Literal fixed at configuration time.
    Constant(String),
    /// Raw SQL with a `{table}` placeholder.
    Expression(String),
}

/// One property of a feature type.
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub name: String,
    /// Property names from the feature root; empty for the root.
    pub path: SchemaPath,
    pub kind: NodeKind,
    pub value_type: Option<ValueType>,
    pub role: Option<Role>,
    pub source: ColumnSource,
    /// Table the node's columns are read from.
    pub table: TableId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl SchemaNode {
    /// Whether the node yields a value per row.
    pub fn is_returnable(&self) -> bool {
        matches!(self.kind, NodeKind::Value | NodeKind::ArrayOfValue)
            && self.source != ColumnSource::None
    }

    /// Dotted queryable name.
    pub fn queryable(&self) -> String {
        self.path.join(".")
    }
}

/// One table reached from the root table.
#[derive(Debug, Clone)]
pub struct TableNode {
    pub path: TablePath,
    pub table: TableRef,
    /// Relation chain from the root table.
    pub relations: Vec<Relation>,
    pub parent: Option<TableId>,
    pub children: Vec<TableId>,
    /// Returnable nodes reading from this table, in declaration order.
    pub columns: Vec<NodeId>,
}

impl TableNode {
    /// Number of relation steps from the root table.
    pub fn depth(&self) -> usize {
        self.relations.len()
    }

    /// Whether the last step may yield several rows per parent row.
    pub fn is_many(&self) -> bool {
        self.relations
            .last()
            .map(|r| r.cardinality.is_many())
            .unwrap_or(false)
    }
}

/// Compiled schema of one feature type. Immutable once built.
#[derive(Debug, Clone)]
pub struct SchemaTree {
    feature_type: String,
    nodes: Vec<SchemaNode>,
    tables: Vec<TableNode>,
    filter: Option<Expr>,
}

impl SchemaTree {
    pub fn feature_type(&self) -> &str {
        &self.feature_type
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root_table(&self) -> TableId {
        TableId(0)
    }

    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    pub fn table(&self, id: TableId) -> &TableNode {
        &self.tables[id.0]
    }

    /// All property nodes in declaration (pre-)order, root first.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SchemaNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// All table nodes, parents before children.
    pub fn tables(&self) -> impl Iterator<Item = (TableId, &TableNode)> {
        self.tables.iter().enumerate().map(|(i, t)| (TableId(i), t))
    }

    /// Filter of the feature type, written against queryables.
    pub fn filter(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    /// Resolve a dotted queryable name to a returnable node.
    pub fn queryable(&self, name: &str) -> Option<NodeId> {
        let mut current = self.root();
        for part in name.split('.') {
            current = *self
                .node(current)
                .children
                .iter()
                .find(|c| self.node(**c).name == part)?;
        }
        if self.node(current).is_returnable() {
            Some(current)
        } else {
            None
        }
    }

    /// The property carrying the feature id.
    pub fn id_property(&self) -> Option<NodeId> {
        self.nodes()
            .find(|(_, n)| n.role == Some(Role::Id))
            .map(|(id, _)| id)
    }

    /// The table whose value query reads `id`: the nearest ancestor-or-self
    /// that is the root or reached through a to-many step. Tables in
    /// between are folded into that query with one-to-one joins.
    pub fn anchor(&self, id: TableId) -> TableId {
        let mut current = id;
        loop {
            let table = self.table(current);
            match table.parent {
                Some(parent) if !table.is_many() => current = parent,
                _ => return current,
            }
        }
    }

    /// Ancestors of a node from the root's children down to its parent.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.node(id).parent;
        while let Some(parent) = current {
            if parent != self.root() {
                chain.push(parent);
            }
            current = self.node(parent).parent;
        }
        chain.reverse();
        chain
    }
}

/// Builds [`SchemaTree`]s from feature type configuration.
pub struct SchemaBuilder<'a> {
    config: &'a ProviderConfig,
    junction_pattern: Option<Regex>,
    parser: Option<&'a dyn FilterParser>,
}

impl<'a> SchemaBuilder<'a> {
    /// Create a builder, compiling the junction table pattern.
    pub fn new(config: &'a ProviderConfig) -> Result<Self, ConfigError> {
        let junction_pattern = config
            .junction_table_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConfigError::InvalidJunctionPattern(e.to_string()))?;
        Ok(Self {
            config,
            junction_pattern,
            parser: None,
        })
    }

    /// Set the parser used for `{filter=...}` flags.
    pub fn with_filter_parser(mut self, parser: &'a dyn FilterParser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Build the tree. Any error rejects the whole feature type.
    pub fn build(&self, feature_type: &FeatureTypeConfig) -> Result<SchemaTree, ConfigError> {
        let root_path = &feature_type.source_path;
        let root = parse_root_path(root_path)?;
        let root_table = self.table_ref(&root, root_path)?;

        let mut tree = SchemaTree {
            feature_type: feature_type.name.clone(),
            nodes: Vec::new(),
            tables: vec![TableNode {
                path: TablePath::root(root.text.clone()),
                table: root_table,
                relations: Vec::new(),
                parent: None,
                children: Vec::new(),
                columns: Vec::new(),
            }],
            filter: feature_type.filter.clone(),
        };
        tree.nodes.push(SchemaNode {
            name: feature_type.name.clone(),
            path: Vec::new(),
            kind: NodeKind::Object,
            value_type: None,
            role: None,
            source: ColumnSource::None,
            table: TableId(0),
            parent: None,
            children: Vec::new(),
        });

        self.add_properties(&mut tree, NodeId(0), TableId(0), &feature_type.properties)?;

        debug!(
            feature_type = %feature_type.name,
            nodes = tree.nodes.len(),
            tables = tree.tables.len(),
            "built schema tree"
        );
        Ok(tree)
    }

    fn add_properties(
        &self,
        tree: &mut SchemaTree,
        parent: NodeId,
        parent_table: TableId,
        properties: &[PropertyConfig],
    ) -> Result<(), ConfigError> {
        for (i, property) in properties.iter().enumerate() {
            if properties[..i].iter().any(|p| p.name == property.name) {
                let mut path = tree.node(parent).path.clone();
                path.push(property.name.clone());
                return Err(ConfigError::DuplicateProperty(path.join(".")));
            }
            self.add_property(tree, parent, parent_table, property)?;
        }
        Ok(())
    }

    fn add_property(
        &self,
        tree: &mut SchemaTree,
        parent: NodeId,
        parent_table: TableId,
        property: &PropertyConfig,
    ) -> Result<(), ConfigError> {
        let path_text = property.source_path.as_deref().unwrap_or_default();
        let parsed = match &property.source_path {
            Some(path) => parse_relative_path(path)?,
            None => SourcePath::default(),
        };
        let table = self.resolve_tables(tree, parent_table, &parsed.tables, path_text)?;
        let invalid = |reason: &str| ConfigError::InvalidSourcePath {
            path: if path_text.is_empty() {
                property.name.clone()
            } else {
                path_text.to_string()
            },
            reason: reason.to_string(),
        };

        let kind = match property.property_type {
            PropertyType::Object | PropertyType::ObjectArray => {
                if parsed.column.is_some() {
                    return Err(invalid("object path must end at a table"));
                }
                if property.property_type == PropertyType::ObjectArray {
                    if parsed.tables.is_empty() {
                        return Err(ConfigError::MissingRelation(property.name.clone()));
                    }
                    NodeKind::ArrayOfObject
                } else {
                    NodeKind::Object
                }
            }
            PropertyType::ValueArray => {
                if parsed.tables.is_empty() {
                    return Err(ConfigError::MissingRelation(property.name.clone()));
                }
                NodeKind::ArrayOfValue
            }
            _ => NodeKind::Value,
        };

        let source = if let Some(constant) = &property.constant {
            ColumnSource::Constant(constant.clone())
        } else if let Some(expression) = &property.expression {
            ColumnSource::Expression(expression.clone())
        } else if let Some(column) = &parsed.column {
            ColumnSource::Column(column.clone())
        } else {
            ColumnSource::None
        };
        let is_value = matches!(kind, NodeKind::Value | NodeKind::ArrayOfValue);
        if is_value && source == ColumnSource::None {
            return Err(invalid("value property needs a column, constant or expression"));
        }
        if is_value && !property.properties.is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "value property '{}' cannot have nested properties",
                property.name
            )));
        }

        let value_type = match kind {
            NodeKind::Value => property.property_type.value_type(),
            NodeKind::ArrayOfValue => Some(property.value_type.unwrap_or(ValueType::String)),
            _ => None,
        };

        let id = NodeId(tree.nodes.len());
        let mut path = tree.node(parent).path.clone();
        path.push(property.name.clone());
        tree.nodes.push(SchemaNode {
            name: property.name.clone(),
            path,
            kind,
            value_type,
            role: property.role,
            source,
            table,
            parent: Some(parent),
            children: Vec::new(),
        });
        tree.nodes[parent.0].children.push(id);
        if tree.node(id).is_returnable() {
            tree.tables[table.0].columns.push(id);
        }

        if !is_value {
            self.add_properties(tree, id, table, &property.properties)?;
        }
        Ok(())
    }

    /// Walk the joined segments from `from`, creating table nodes as needed.
    fn resolve_tables(
        &self,
        tree: &mut SchemaTree,
        from: TableId,
        segments: &[TableSegment],
        path: &str,
    ) -> Result<TableId, ConfigError> {
        let mut current = from;
        let mut i = 0;
        while i < segments.len() {
            let segment = &segments[i];
            let source = tree.table(current).table.clone();
            let (source_field, target_field) = segment.join.clone().unwrap_or_default();

            let relation = if self.is_junction(segment) {
                let target_segment =
                    segments
                        .get(i + 1)
                        .ok_or_else(|| ConfigError::InvalidSourcePath {
                            path: path.to_string(),
                            reason: "junction table must be followed by a target table".into(),
                        })?;
                let (junction_target, target_field) =
                    target_segment.join.clone().unwrap_or_default();
                let junction = Junction {
                    table: self.table_ref(segment, path)?,
                    source_field: target_field_of(segment),
                    target_field: junction_target,
                };
                let target = self.table_ref(target_segment, path)?;
                i += 2;
                Relation::many_to_many(source, source_field, junction, target, target_field)
                    .with_segment(format!("{}/{}", segment.text, target_segment.text))
            } else {
                let target = self.table_ref(segment, path)?;
                let cardinality = if target_field == target.primary_key {
                    Cardinality::OneToOne
                } else {
                    Cardinality::OneToMany
                };
                i += 1;
                Relation::direct(cardinality, source, source_field, target, target_field)
                    .with_segment(segment.text.clone())
            };

            current = child_table(tree, current, relation);
        }
        Ok(current)
    }

    fn is_junction(&self, segment: &TableSegment) -> bool {
        segment.is_junction_flagged()
            || self
                .junction_pattern
                .as_ref()
                .map(|p| p.is_match(&segment.table))
                .unwrap_or(false)
    }

    fn table_ref(&self, segment: &TableSegment, path: &str) -> Result<TableRef, ConfigError> {
        let name = match &self.config.default_schema {
            Some(schema) if !segment.table.contains('.') => format!("{}.{}", schema, segment.table),
            _ => segment.table.clone(),
        };
        let sort_key = segment
            .sort_key()
            .unwrap_or(&self.config.default_sort_key)
            .to_string();
        if sort_key.is_empty() {
            return Err(ConfigError::MissingSortKey {
                table: name,
                path: path.to_string(),
            });
        }
        let primary_key = segment
            .primary_key()
            .unwrap_or(&self.config.default_primary_key)
            .to_string();

        let mut table = TableRef::new(name, sort_key, primary_key);
        if let Some(text) = segment.filter() {
            let parser = self.parser.ok_or_else(|| ConfigError::FilterFlag {
                path: path.to_string(),
                reason: "no filter parser configured".into(),
            })?;
            let filter = parser.parse(text).map_err(|reason| ConfigError::FilterFlag {
                path: path.to_string(),
                reason,
            })?;
            table = table.with_filter(filter);
        }
        Ok(table)
    }
}

fn target_field_of(segment: &TableSegment) -> String {
    segment
        .join
        .as_ref()
        .map(|(_, target)| target.clone())
        .unwrap_or_default()
}

fn child_table(tree: &mut SchemaTree, parent: TableId, relation: Relation) -> TableId {
    let existing = tree.tables[parent.0].children.iter().copied().find(|c| {
        tree.tables[c.0].relations.last().map(|r| &r.segment) == Some(&relation.segment)
    });
    if let Some(existing) = existing {
        return existing;
    }

    let id = TableId(tree.tables.len());
    let parent_node = &tree.tables[parent.0];
    let mut relations = parent_node.relations.clone();
    let path = parent_node.path.child(relation.segment.clone());
    let table = relation.target.clone();
    relations.push(relation);
    tree.tables.push(TableNode {
        path,
        table,
        relations,
        parent: Some(parent),
        children: Vec::new(),
        columns: Vec::new(),
    });
    tree.tables[parent.0].children.push(id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use featsql_proto::Scalar;

    struct StaticParser;

    impl FilterParser for StaticParser {
        fn parse(&self, text: &str) -> Result<Expr, String> {
            match text.split_once('=') {
                Some((name, value)) => Ok(Expr::eq(name, Scalar::String(value.trim_matches('\'').into()))),
                None => Err(format!("cannot parse '{}'", text)),
            }
        }
    }

    fn observation() -> FeatureTypeConfig {
        FeatureTypeConfig::new("observation", "/observation")
            .with_property(PropertyConfig::value("id", PropertyType::Integer, "id").with_role(Role::Id))
            .with_property(PropertyConfig::value("name", PropertyType::String, "name"))
            .with_property(
                PropertyConfig::new("station", PropertyType::Object)
                    .with_source_path("[station_fk=id]station")
                    .with_property(PropertyConfig::value("name", PropertyType::String, "name"))
                    .with_property(PropertyConfig::value("code", PropertyType::String, "code")),
            )
            .with_property(PropertyConfig::value(
                "stationName",
                PropertyType::String,
                "[station_fk=id]station/name",
            ))
            .with_property(
                PropertyConfig::value("tags", PropertyType::ValueArray, "[id=obs_id]tag/value")
                    .with_value_type(ValueType::String),
            )
            .with_property(
                PropertyConfig::new("authors", PropertyType::ObjectArray)
                    .with_source_path("[id=obs_id]obs_author{junction}/[author_id=id]author")
                    .with_property(PropertyConfig::value("name", PropertyType::String, "name")),
            )
    }

    fn build(feature_type: &FeatureTypeConfig) -> Result<SchemaTree, ConfigError> {
        let config = ProviderConfig::default();
        SchemaBuilder::new(&config)?.build(feature_type)
    }

    #[test]
    fn test_shared_table_paths_merge() {
        let tree = build(&observation()).unwrap();
        // root, station, tag, author
        assert_eq!(tree.tables().count(), 4);
        let station = tree.table(tree.node(tree.queryable("station.name").unwrap()).table);
        assert_eq!(station.columns.len(), 3);
        assert_eq!(station.relations[0].cardinality, Cardinality::OneToOne);
        assert_eq!(station.path.to_string(), "/observation/[station_fk=id]station");
    }

    #[test]
    fn test_cardinality_inference() {
        let tree = build(&observation()).unwrap();
        let tags = tree.table(tree.node(tree.queryable("tags").unwrap()).table);
        assert_eq!(tags.relations[0].cardinality, Cardinality::OneToMany);
        let authors = tree.table(tree.node(tree.queryable("authors.name").unwrap()).table);
        assert_eq!(authors.relations[0].cardinality, Cardinality::ManyToMany);
        let junction = authors.relations[0].junction.as_ref().unwrap();
        assert_eq!(junction.table.name, "obs_author");
        assert_eq!(junction.source_field, "obs_id");
        assert_eq!(junction.target_field, "author_id");
        assert_eq!(authors.relations[0].target_field, "id");
    }

    #[test]
    fn test_junction_pattern() {
        let config = ProviderConfig::default().with_junction_table_pattern("_2_");
        let feature_type = FeatureTypeConfig::new("a", "/a").with_property(
            PropertyConfig::value("bs", PropertyType::ValueArray, "[id=a_id]a_2_b/[b_id=id]b/name"),
        );
        let tree = SchemaBuilder::new(&config).unwrap().build(&feature_type).unwrap();
        let table = tree.table(tree.node(tree.queryable("bs").unwrap()).table);
        assert!(table.relations[0].is_many_to_many());
    }

    #[test]
    fn test_queryable_and_id() {
        let tree = build(&observation()).unwrap();
        assert!(tree.queryable("station").is_none());
        assert!(tree.queryable("nope").is_none());
        let id = tree.id_property().unwrap();
        assert_eq!(tree.node(id).queryable(), "id");
        let name = tree.queryable("authors.name").unwrap();
        assert_eq!(tree.ancestors(name).len(), 1);
    }

    #[test]
    fn test_anchor_skips_one_to_one() {
        let tree = build(&observation()).unwrap();
        let station = tree.node(tree.queryable("station.name").unwrap()).table;
        let tags = tree.node(tree.queryable("tags").unwrap()).table;
        assert_eq!(tree.anchor(station), tree.root_table());
        assert_eq!(tree.anchor(tags), tags);
        assert_eq!(tree.anchor(tree.root_table()), tree.root_table());
    }

    #[test]
    fn test_default_schema_and_flags() {
        let config = ProviderConfig::default()
            .with_default_schema("obs")
            .with_default_sort_key("fid");
        let feature_type = FeatureTypeConfig::new("a", "/a{sortKey=oid}")
            .with_property(PropertyConfig::value("v", PropertyType::String, "[id=a_id]b/v"));
        let tree = SchemaBuilder::new(&config).unwrap().build(&feature_type).unwrap();
        assert_eq!(tree.table(tree.root_table()).table.name, "obs.a");
        assert_eq!(tree.table(tree.root_table()).table.sort_key, "oid");
        let b = tree.table(tree.node(tree.queryable("v").unwrap()).table);
        assert_eq!(b.table.sort_key, "fid");
    }

    #[test]
    fn test_filter_flag_requires_parser() {
        let feature_type = FeatureTypeConfig::new("a", "/a{filter=kind='x'}");
        let err = build(&feature_type).unwrap_err();
        assert!(matches!(err, ConfigError::FilterFlag { .. }));

        let config = ProviderConfig::default();
        let tree = SchemaBuilder::new(&config)
            .unwrap()
            .with_filter_parser(&StaticParser)
            .build(&feature_type)
            .unwrap();
        assert_eq!(
            tree.table(tree.root_table()).table.filter,
            Some(Expr::eq("kind", "x"))
        );
    }

    #[test]
    fn test_build_errors() {
        let bad_path = FeatureTypeConfig::new("a", "/a")
            .with_property(PropertyConfig::value("v", PropertyType::String, "[id=a_id b/v"));
        assert!(matches!(
            build(&bad_path),
            Err(ConfigError::InvalidSourcePath { .. })
        ));

        let no_relation = FeatureTypeConfig::new("a", "/a")
            .with_property(PropertyConfig::value("v", PropertyType::ValueArray, "v"));
        assert!(matches!(
            build(&no_relation),
            Err(ConfigError::MissingRelation(_))
        ));

        let duplicate = FeatureTypeConfig::new("a", "/a")
            .with_property(PropertyConfig::value("v", PropertyType::String, "v"))
            .with_property(PropertyConfig::value("v", PropertyType::String, "w"));
        assert!(matches!(
            build(&duplicate),
            Err(ConfigError::DuplicateProperty(_))
        ));

        let dangling_junction = FeatureTypeConfig::new("a", "/a").with_property(
            PropertyConfig::value("v", PropertyType::ValueArray, "[id=a_id]a_b{junction}/v"),
        );
        assert!(build(&dangling_junction).is_err());

        let no_sort_key = FeatureTypeConfig::new("a", "/a")
            .with_property(PropertyConfig::value("v", PropertyType::String, "[id=a_id]b{sortKey=}/v"));
        assert!(matches!(
            build(&no_sort_key),
            Err(ConfigError::MissingSortKey { .. })
        ));
    }

    #[test]
    fn test_constant_and_expression_nodes() {
        let feature_type = FeatureTypeConfig::new("a", "/a")
            .with_property(PropertyConfig::new("kind", PropertyType::String).with_constant("sensor"))
            .with_property(
                PropertyConfig::new("label", PropertyType::String)
                    .with_expression("upper({table}.name)"),
            );
        let tree = build(&feature_type).unwrap();
        let root = tree.table(tree.root_table());
        assert_eq!(root.columns.len(), 2);
        assert_eq!(
            tree.node(root.columns[0]).source,
            ColumnSource::Constant("sensor".into())
        );
    }
}
