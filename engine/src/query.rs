//! Query constraints and their compilation to the backend's filter format.
//!
//! A [`Query`] is an ordered list of per-key constraints. Constraints on the
//! same key combine into one operator object; sort and projection
//! constraints compile to separate parameters. Two queries on the same class
//! combine with `and`/`or` into a combinator node.

use crate::{error::Result, value::GeoPoint, ClassName, Error, Value};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

/// Unit of a geo distance bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistanceUnit {
    Kilometers,
    Miles,
    Radians,
}

impl DistanceUnit {
    fn suffix(self) -> &'static str {
        match self {
            DistanceUnit::Kilometers => "Kilometers",
            DistanceUnit::Miles => "Miles",
            DistanceUnit::Radians => "Radians",
        }
    }
}

/// A distance from a geo point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub value: f64,
    pub unit: DistanceUnit,
}

impl Distance {
    pub fn kilometers(value: f64) -> Self {
        Self {
            value,
            unit: DistanceUnit::Kilometers,
        }
    }

    pub fn miles(value: f64) -> Self {
        Self {
            value,
            unit: DistanceUnit::Miles,
        }
    }

    pub fn radians(value: f64) -> Self {
        Self {
            value,
            unit: DistanceUnit::Radians,
        }
    }
}

/// One predicate, sort directive or projection on a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Fetch the full object behind a pointer field.
    Included,
    /// Return this field; unselected fields are omitted.
    Selected,

    Existed,
    NotExisted,

    EqualTo(Value),
    NotEqualTo(Value),
    LessThan(Value),
    LessThanOrEqualTo(Value),
    GreaterThan(Value),
    GreaterThanOrEqualTo(Value),

    ContainedIn(Vec<Value>),
    NotContainedIn(Vec<Value>),
    ContainedAllIn(Vec<Value>),
    EqualToSize(u64),

    NearbyPoint(GeoPoint),
    NearbyPointWithRange {
        point: GeoPoint,
        from: Option<Distance>,
        to: Option<Distance>,
    },
    NearbyPointWithRectangle {
        southwest: GeoPoint,
        northeast: GeoPoint,
    },

    /// The referenced object satisfies the query.
    MatchedQuery(Box<Query>),
    NotMatchedQuery(Box<Query>),
    /// The value equals `key` of some object satisfying the query.
    MatchedQueryAndKey { query: Box<Query>, key: String },
    NotMatchedQueryAndKey { query: Box<Query>, key: String },

    MatchedPattern {
        pattern: String,
        options: Option<String>,
    },
    MatchedSubstring(String),
    PrefixedBy(String),
    SuffixedBy(String),

    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logic {
    And,
    Or,
}

impl Logic {
    fn operator(self) -> &'static str {
        match self {
            Logic::And => "$and",
            Logic::Or => "$or",
        }
    }
}

/// A composable filter, sort and projection on one class.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    class_name: ClassName,
    constraints: Vec<(String, Constraint)>,
    combinator: Option<(Logic, Vec<Query>)>,
    limit: Option<u64>,
    skip: Option<u64>,
}

impl Query {
    pub fn new(class_name: impl Into<ClassName>) -> Self {
        Self {
            class_name: class_name.into(),
            constraints: Vec::new(),
            combinator: None,
            limit: None,
            skip: None,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Add a constraint on `key`.
    pub fn where_key(&mut self, key: impl Into<String>, constraint: Constraint) -> &mut Self {
        self.constraints.push((key.into(), constraint));
        self
    }

    pub fn set_limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_skip(&mut self, skip: u64) -> &mut Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn skip(&self) -> Option<u64> {
        self.skip
    }

    /// Both queries must hold.
    pub fn and(self, other: Query) -> Result<Query> {
        self.combine(Logic::And, other)
    }

    /// Either query must hold.
    pub fn or(self, other: Query) -> Result<Query> {
        self.combine(Logic::Or, other)
    }

    fn combine(self, logic: Logic, other: Query) -> Result<Query> {
        if self.class_name != other.class_name {
            return Err(Error::IncompatibleQueryClass {
                left: self.class_name,
                right: other.class_name,
            });
        }
        let mut query = Query::new(self.class_name.clone());
        query.combinator = Some((logic, vec![self, other]));
        Ok(query)
    }

    /// Compile into filter, sort and projection parameters.
    pub fn compile(&self) -> CompiledQuery {
        let mut compiled = CompiledQuery {
            class_name: self.class_name.clone(),
            where_: JsonMap::new(),
            order: Vec::new(),
            include: Vec::new(),
            keys: Vec::new(),
            limit: self.limit,
            skip: self.skip,
        };

        // Operator objects per key, in first-seen order.
        let mut fields: Vec<(String, JsonMap<String, JsonValue>)> = Vec::new();
        for (key, constraint) in &self.constraints {
            let operators = match constraint {
                Constraint::Included => {
                    compiled.include.push(key.clone());
                    continue;
                }
                Constraint::Selected => {
                    compiled.keys.push(key.clone());
                    continue;
                }
                Constraint::Ascending => {
                    compiled.order.push(key.clone());
                    continue;
                }
                Constraint::Descending => {
                    compiled.order.push(format!("-{key}"));
                    continue;
                }
                other => compile_constraint(other),
            };

            let index = match fields.iter().position(|(k, _)| k == key) {
                Some(index) => index,
                None => {
                    fields.push((key.clone(), JsonMap::new()));
                    fields.len() - 1
                }
            };
            fields[index].1.extend(operators);
        }

        for (key, mut operators) in fields {
            let value = if operators.len() == 1 && operators.contains_key("$eq") {
                operators.remove("$eq").unwrap_or(JsonValue::Null)
            } else {
                JsonValue::Object(operators)
            };
            compiled.where_.insert(key, value);
        }

        if let Some((logic, children)) = &self.combinator {
            let children = children
                .iter()
                .map(|child| JsonValue::Object(child.compile().where_))
                .collect();
            compiled
                .where_
                .insert(logic.operator().to_string(), JsonValue::Array(children));
        }

        compiled
    }

    fn subquery(&self) -> JsonValue {
        let compiled = self.compile();
        let mut map = JsonMap::new();
        map.insert("where".into(), JsonValue::Object(compiled.where_));
        map.insert("className".into(), json!(compiled.class_name));
        if let Some(limit) = compiled.limit {
            map.insert("limit".into(), json!(limit));
        }
        if let Some(skip) = compiled.skip {
            map.insert("skip".into(), json!(skip));
        }
        JsonValue::Object(map)
    }
}

impl std::ops::BitAnd for Query {
    type Output = Result<Query>;

    fn bitand(self, other: Query) -> Result<Query> {
        self.and(other)
    }
}

impl std::ops::BitOr for Query {
    type Output = Result<Query>;

    fn bitor(self, other: Query) -> Result<Query> {
        self.or(other)
    }
}

fn values(items: &[Value]) -> JsonValue {
    JsonValue::Array(items.iter().map(Value::to_json).collect())
}

fn geo(point: &GeoPoint) -> JsonValue {
    Value::GeoPoint(*point).to_json()
}

fn compile_constraint(constraint: &Constraint) -> JsonMap<String, JsonValue> {
    let mut out = JsonMap::new();
    let mut put = |op: &str, value: JsonValue| {
        out.insert(op.to_string(), value);
    };

    match constraint {
        Constraint::Existed => put("$exists", json!(true)),
        Constraint::NotExisted => put("$exists", json!(false)),

        Constraint::EqualTo(v) => put("$eq", v.to_json()),
        Constraint::NotEqualTo(v) => put("$ne", v.to_json()),
        Constraint::LessThan(v) => put("$lt", v.to_json()),
        Constraint::LessThanOrEqualTo(v) => put("$lte", v.to_json()),
        Constraint::GreaterThan(v) => put("$gt", v.to_json()),
        Constraint::GreaterThanOrEqualTo(v) => put("$gte", v.to_json()),

        Constraint::ContainedIn(items) => put("$in", values(items)),
        Constraint::NotContainedIn(items) => put("$nin", values(items)),
        Constraint::ContainedAllIn(items) => put("$all", values(items)),
        Constraint::EqualToSize(size) => put("$size", json!(size)),

        Constraint::NearbyPoint(point) => put("$nearSphere", geo(point)),
        Constraint::NearbyPointWithRange { point, from, to } => {
            put("$nearSphere", geo(point));
            if let Some(from) = from {
                put(
                    &format!("$minDistanceIn{}", from.unit.suffix()),
                    json!(from.value),
                );
            }
            if let Some(to) = to {
                put(
                    &format!("$maxDistanceIn{}", to.unit.suffix()),
                    json!(to.value),
                );
            }
        }
        Constraint::NearbyPointWithRectangle {
            southwest,
            northeast,
        } => put(
            "$within",
            json!({ "$box": [geo(southwest), geo(northeast)] }),
        ),

        Constraint::MatchedQuery(query) => put("$inQuery", query.subquery()),
        Constraint::NotMatchedQuery(query) => put("$notInQuery", query.subquery()),
        Constraint::MatchedQueryAndKey { query, key } => put(
            "$select",
            json!({ "query": query.subquery(), "key": key }),
        ),
        Constraint::NotMatchedQueryAndKey { query, key } => put(
            "$dontSelect",
            json!({ "query": query.subquery(), "key": key }),
        ),

        Constraint::MatchedPattern { pattern, options } => {
            put("$regex", json!(pattern));
            if let Some(options) = options {
                put("$options", json!(options));
            }
        }
        Constraint::MatchedSubstring(s) => put("$regex", json!(regex::escape(s))),
        Constraint::PrefixedBy(s) => put("$regex", json!(format!("^{}", regex::escape(s)))),
        Constraint::SuffixedBy(s) => put("$regex", json!(format!("{}$", regex::escape(s)))),

        Constraint::Included | Constraint::Selected | Constraint::Ascending | Constraint::Descending => {}
    }

    out
}

/// A query in wire form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    #[serde(skip)]
    pub class_name: ClassName,
    #[serde(rename = "where")]
    pub where_: JsonMap<String, JsonValue>,
    pub order: Vec<String>,
    pub include: Vec<String>,
    pub keys: Vec<String>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

impl CompiledQuery {
    /// URL query parameters; empty parts are left out.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.where_.is_empty() {
            params.push((
                "where".to_string(),
                JsonValue::Object(self.where_.clone()).to_string(),
            ));
        }
        for (name, list) in [
            ("order", &self.order),
            ("include", &self.include),
            ("keys", &self.keys),
        ] {
            if !list.is_empty() {
                params.push((name.to_string(), list.join(",")));
            }
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(skip) = self.skip {
            params.push(("skip".to_string(), skip.to_string()));
        }
        params
    }
}
