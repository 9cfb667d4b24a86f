//! JOIN clause generation along a relation chain.

use crate::schema::Relation;

/// Join flavour of one relation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
}

impl JoinType {
    fn keyword(self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// Per-step options of a join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinStep {
    pub join_type: JoinType,
    /// Predicate on the target alias, ANDed into the ON clause.
    pub condition: Option<String>,
    /// Predicate on the junction alias of a many-to-many step.
    pub junction_condition: Option<String>,
    /// Replace the target by a sub-select numbering its rows within each
    /// parent, exposed as `row_number`.
    pub numbered: bool,
    /// Predicate on the source table inside the numbering sub-select,
    /// written against alias `A`. Ignored for many-to-many steps.
    pub source_condition: Option<String>,
}

impl JoinStep {
    pub fn inner() -> Self {
        Self::default()
    }

    pub fn left() -> Self {
        Self {
            join_type: JoinType::Left,
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_junction_condition(mut self, condition: impl Into<String>) -> Self {
        self.junction_condition = Some(condition.into());
        self
    }

    pub fn numbered(mut self) -> Self {
        self.numbered = true;
        self
    }

    pub fn with_source_condition(mut self, condition: impl Into<String>) -> Self {
        self.source_condition = Some(condition.into());
        self
    }
}

fn and(condition: &Option<String>) -> String {
    match condition {
        Some(c) => format!(" AND ({})", c),
        None => String::new(),
    }
}

/// Render the JOIN clauses of a chain.
///
/// `aliases` must come from [`super::alias::aliases`] (or `aliases_from`)
/// for the same chain. `steps` may be shorter than the chain; missing steps
/// are plain inner joins.
pub fn joins(chain: &[Relation], aliases: &[String], steps: &[JoinStep]) -> String {
    let default = JoinStep::default();
    let mut clauses = Vec::with_capacity(chain.len());
    let mut index = 0;

    for (i, relation) in chain.iter().enumerate() {
        let step = steps.get(i).unwrap_or(&default);
        let keyword = step.join_type.keyword();
        let source = &aliases[index];

        match &relation.junction {
            Some(junction) => {
                let junction_alias = &aliases[index + 1];
                let target = &aliases[index + 2];
                clauses.push(format!(
                    "{} {} {} ON ({}.{}={}.{}{})",
                    keyword,
                    junction.table.name,
                    junction_alias,
                    source,
                    relation.source_field,
                    junction_alias,
                    junction.source_field,
                    and(&step.junction_condition)
                ));
                let (table, extra) = if step.numbered {
                    (
                        format!(
                            "(SELECT A.{jsf} AS A{jsf}, B.*, row_number() OVER (PARTITION BY A.{jsf} ORDER BY B.{sk}) AS row_number FROM {junction} A JOIN {target} B ON (A.{jtf}=B.{tf}))",
                            jsf = junction.source_field,
                            sk = relation.target.sort_key,
                            junction = junction.table.name,
                            target = relation.target.name,
                            jtf = junction.target_field,
                            tf = relation.target_field,
                        ),
                        format!(
                            " AND {}.{}={}.A{}",
                            junction_alias, junction.source_field, target, junction.source_field
                        ),
                    )
                } else {
                    (relation.target.name.clone(), String::new())
                };
                clauses.push(format!(
                    "{} {} {} ON ({}.{}={}.{}{}{})",
                    keyword,
                    table,
                    target,
                    junction_alias,
                    junction.target_field,
                    target,
                    relation.target_field,
                    extra,
                    and(&step.condition)
                ));
                index += 2;
            }
            None => {
                let target = &aliases[index + 1];
                let table = if step.numbered {
                    let filter = step
                        .source_condition
                        .as_ref()
                        .map(|c| format!(" WHERE {}", c))
                        .unwrap_or_default();
                    format!(
                        "(SELECT A.{sf} AS A{sf}, B.*, row_number() OVER (PARTITION BY B.{tf} ORDER BY B.{sk}) AS row_number FROM {source} A JOIN {target} B ON (A.{sf}=B.{tf}){filter})",
                        sf = relation.source_field,
                        tf = relation.target_field,
                        sk = relation.target.sort_key,
                        source = relation.source.name,
                        target = relation.target.name,
                        filter = filter,
                    )
                } else {
                    relation.target.name.clone()
                };
                clauses.push(format!(
                    "{} {} {} ON ({}.{}={}.{}{})",
                    keyword,
                    table,
                    target,
                    source,
                    relation.source_field,
                    target,
                    relation.target_field,
                    and(&step.condition)
                ));
                index += 1;
            }
        }
    }

    clauses.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::alias::aliases;
    use crate::schema::{Cardinality, Junction, TableRef};
    use pretty_assertions::assert_eq;

    fn t(name: &str) -> TableRef {
        TableRef::new(name, "id", "id")
    }

    fn one_to_many() -> Relation {
        Relation::direct(Cardinality::OneToMany, t("obs"), "id", t("tag"), "obs_id")
    }

    fn many_to_many() -> Relation {
        Relation::many_to_many(
            t("obs"),
            "id",
            Junction {
                table: t("obs_author"),
                source_field: "obs_id".into(),
                target_field: "author_id".into(),
            },
            t("author"),
            "id",
        )
    }

    #[test]
    fn test_plain_join() {
        let chain = vec![one_to_many()];
        assert_eq!(
            joins(&chain, &aliases(&chain), &[]),
            "JOIN tag B ON (A.id=B.obs_id)"
        );
    }

    #[test]
    fn test_join_with_condition_and_left() {
        let chain = vec![one_to_many()];
        let steps = [JoinStep::left().with_condition("B.kind = 'x'")];
        assert_eq!(
            joins(&chain, &aliases(&chain), &steps),
            "LEFT JOIN tag B ON (A.id=B.obs_id AND (B.kind = 'x'))"
        );
    }

    #[test]
    fn test_many_to_many_join() {
        let chain = vec![many_to_many()];
        assert_eq!(
            joins(&chain, &aliases(&chain), &[]),
            "JOIN obs_author B ON (A.id=B.obs_id) JOIN author C ON (B.author_id=C.id)"
        );
    }

    #[test]
    fn test_numbered_join() {
        let chain = vec![one_to_many()];
        let steps = [JoinStep::inner()
            .numbered()
            .with_condition("B.row_number = 1")
            .with_source_condition("A.kind = 'x'")];
        assert_eq!(
            joins(&chain, &aliases(&chain), &steps),
            "JOIN (SELECT A.id AS Aid, B.*, row_number() OVER (PARTITION BY B.obs_id ORDER BY B.id) AS row_number FROM obs A JOIN tag B ON (A.id=B.obs_id) WHERE A.kind = 'x') B ON (A.id=B.obs_id AND (B.row_number = 1))"
        );
    }

    #[test]
    fn test_numbered_many_to_many_join() {
        let chain = vec![many_to_many()];
        let steps = [JoinStep::inner().numbered().with_condition("C.row_number = 1")];
        assert_eq!(
            joins(&chain, &aliases(&chain), &steps),
            "JOIN obs_author B ON (A.id=B.obs_id) JOIN (SELECT A.obs_id AS Aobs_id, B.*, row_number() OVER (PARTITION BY A.obs_id ORDER BY B.id) AS row_number FROM obs_author A JOIN author B ON (A.author_id=B.id)) C ON (B.author_id=C.id AND B.obs_id=C.Aobs_id AND (C.row_number = 1))"
        );
    }

    #[test]
    fn test_joins_are_deterministic() {
        let chain = vec![one_to_many(), many_to_many()];
        let first = joins(&chain, &aliases(&chain), &[]);
        let _ = joins(&chain[1..], &aliases(&chain[1..]), &[]);
        assert_eq!(first, joins(&chain, &aliases(&chain), &[]));
    }
}
