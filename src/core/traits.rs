//! The trait algebra: a closed hierarchy of entity kinds plus generic wrappers.
//!
//! ```text
//! Entity
//! ├── Object
//! │   └── Labware ── Tube ── Tube5
//! │               └─ Plate ── Plate96
//! └── Data
//!     ├── Scalar ── Boolean | Integer | Float | String ── Class ── LiquidClass
//!     └── Array[T]
//! ```
//!
//! Generic wrappers are `Array[T]`, `Any[T]`, `Spread[T]`, `Optional[T]` and
//! `Struct[T1, .., Tn]`. Traits combine with set-union (`Integer | Float`).

use crate::core::error::TraitError;
use crate::core::expr::TraitExpr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A nominal entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Entity,
    Object,
    Data,
    Scalar,
    Boolean,
    Integer,
    Float,
    String,
    Class,
    LiquidClass,
    Labware,
    Tube,
    Tube5,
    Plate,
    Plate96,
}

impl Kind {
    pub const ALL: [Kind; 15] = [
        Kind::Entity,
        Kind::Object,
        Kind::Data,
        Kind::Scalar,
        Kind::Boolean,
        Kind::Integer,
        Kind::Float,
        Kind::String,
        Kind::Class,
        Kind::LiquidClass,
        Kind::Labware,
        Kind::Tube,
        Kind::Tube5,
        Kind::Plate,
        Kind::Plate96,
    ];

    /// The direct parent in the hierarchy. `Entity` is the root.
    pub fn parent(self) -> Option<Kind> {
        match self {
            Kind::Entity => None,
            Kind::Object | Kind::Data => Some(Kind::Entity),
            Kind::Scalar => Some(Kind::Data),
            Kind::Boolean | Kind::Integer | Kind::Float | Kind::String => Some(Kind::Scalar),
            Kind::Class => Some(Kind::String),
            Kind::LiquidClass => Some(Kind::Class),
            Kind::Labware => Some(Kind::Object),
            Kind::Tube | Kind::Plate => Some(Kind::Labware),
            Kind::Tube5 => Some(Kind::Tube),
            Kind::Plate96 => Some(Kind::Plate),
        }
    }

    /// Reflexive, transitive subclass check.
    pub fn is_subkind_of(self, other: Kind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Entity => "Entity",
            Kind::Object => "Object",
            Kind::Data => "Data",
            Kind::Scalar => "Scalar",
            Kind::Boolean => "Boolean",
            Kind::Integer => "Integer",
            Kind::Float => "Float",
            Kind::String => "String",
            Kind::Class => "Class",
            Kind::LiquidClass => "LiquidClass",
            Kind::Labware => "Labware",
            Kind::Tube => "Tube",
            Kind::Tube5 => "Tube5",
            Kind::Plate => "Plate",
            Kind::Plate96 => "Plate96",
        }
    }

    pub fn from_name(name: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// A structural type tag carried by ports and tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trait {
    Kind(Kind),
    Array(Box<Trait>),
    Any(Box<Trait>),
    Spread(Box<Trait>),
    Optional(Box<Trait>),
    Struct(Vec<Trait>),
    /// Always flattened, sorted and holding at least two members; build with [`Trait::union`].
    Union(Vec<Trait>),
}

impl Trait {
    pub const ENTITY: Trait = Trait::Kind(Kind::Entity);
    pub const OBJECT: Trait = Trait::Kind(Kind::Object);
    pub const DATA: Trait = Trait::Kind(Kind::Data);
    pub const SCALAR: Trait = Trait::Kind(Kind::Scalar);
    pub const BOOLEAN: Trait = Trait::Kind(Kind::Boolean);
    pub const INTEGER: Trait = Trait::Kind(Kind::Integer);
    pub const FLOAT: Trait = Trait::Kind(Kind::Float);
    pub const STRING: Trait = Trait::Kind(Kind::String);
    pub const LIQUID_CLASS: Trait = Trait::Kind(Kind::LiquidClass);
    pub const LABWARE: Trait = Trait::Kind(Kind::Labware);
    pub const TUBE5: Trait = Trait::Kind(Kind::Tube5);
    pub const PLATE96: Trait = Trait::Kind(Kind::Plate96);

    pub fn array(inner: Trait) -> Trait {
        Trait::Array(Box::new(inner))
    }

    pub fn any(inner: Trait) -> Trait {
        Trait::Any(Box::new(inner))
    }

    pub fn spread(inner: Trait) -> Trait {
        Trait::Spread(Box::new(inner))
    }

    pub fn optional(inner: Trait) -> Trait {
        Trait::Optional(Box::new(inner))
    }

    pub fn structure(members: impl IntoIterator<Item = Trait>) -> Trait {
        Trait::Struct(members.into_iter().collect())
    }

    /// `Integer | Float`.
    pub fn real() -> Trait {
        Trait::union([Trait::INTEGER, Trait::FLOAT])
    }

    /// Builds a normalized union. Nested unions are flattened and duplicates
    /// removed; a single member collapses to itself.
    ///
    /// # Panics
    /// Panics on an empty member list.
    pub fn union(members: impl IntoIterator<Item = Trait>) -> Trait {
        let mut flat = Vec::new();
        for member in members {
            match member {
                Trait::Union(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        flat.sort();
        flat.dedup();
        match flat.len() {
            0 => panic!("a trait union needs at least one member"),
            1 => flat.remove(0),
            _ => Trait::Union(flat),
        }
    }

    /// `self | other`.
    pub fn or(self, other: Trait) -> Trait {
        Trait::union([self, other])
    }

    /// The kind a generic wrapper falls back to for nominal checks.
    fn wrapper_kind(&self) -> Option<Kind> {
        match self {
            Trait::Array(_) => Some(Kind::Data),
            Trait::Any(_) | Trait::Spread(_) | Trait::Optional(_) | Trait::Struct(_) => {
                Some(Kind::Entity)
            }
            Trait::Kind(_) | Trait::Union(_) => None,
        }
    }

    fn single_arg(&self) -> Option<&Trait> {
        match self {
            Trait::Array(inner) | Trait::Any(inner) | Trait::Spread(inner) | Trait::Optional(inner) => {
                Some(inner)
            }
            _ => None,
        }
    }

    /// True if every value described by `self` is also described by `other`.
    pub fn acceptable(&self, other: &Trait) -> bool {
        match (self, other) {
            (Trait::Union(members), _) => members.iter().all(|m| m.acceptable(other)),
            (_, Trait::Union(members)) => members.iter().any(|m| self.acceptable(m)),
            (_, Trait::Any(target)) => match self {
                Trait::Kind(_) => self.acceptable(target),
                Trait::Struct(members) => {
                    self.acceptable(target) || members.iter().any(|m| m.acceptable(other))
                }
                _ => {
                    self.acceptable(target)
                        || self.single_arg().is_some_and(|inner| inner.acceptable(other))
                }
            },
            (Trait::Kind(a), Trait::Kind(b)) => a.is_subkind_of(*b),
            (_, Trait::Kind(b)) => self.wrapper_kind().is_some_and(|k| k.is_subkind_of(*b)),
            (Trait::Kind(_), _) => false,
            (Trait::Struct(a), Trait::Struct(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.acceptable(y))
            }
            (Trait::Array(a), Trait::Array(b))
            | (Trait::Spread(a), Trait::Spread(b))
            | (Trait::Optional(a), Trait::Optional(b)) => a.acceptable(b),
            _ => false,
        }
    }

    /// Object-bearing: a value of this trait holds at least one physical object.
    pub fn is_object(&self) -> bool {
        self.acceptable(&Trait::any(Trait::OBJECT))
    }

    pub fn is_data(&self) -> bool {
        self.acceptable(&Trait::any(Trait::DATA))
    }

    pub fn is_spread(&self) -> bool {
        matches!(self, Trait::Spread(_))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Trait::Optional(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Trait::Array(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Trait::Struct(_))
    }

    /// Extracts the sole type parameter of a generic trait.
    pub fn first_arg(&self) -> Result<&Trait, TraitError> {
        match self {
            Trait::Struct(members) if members.len() == 1 => Ok(&members[0]),
            _ => self
                .single_arg()
                .ok_or_else(|| TraitError::NotParameterized(self.to_string())),
        }
    }

    pub fn struct_members(&self) -> Option<&[Trait]> {
        match self {
            Trait::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Strips one `Spread` layer, if present.
    pub fn strip_spread(&self) -> &Trait {
        match self {
            Trait::Spread(inner) => inner,
            other => other,
        }
    }

    /// Strips one `Optional` layer, if present.
    pub fn strip_optional(&self) -> &Trait {
        match self {
            Trait::Optional(inner) => inner,
            other => other,
        }
    }

    /// Least upper bound over the primitive numeric basis
    /// (`Integer`, `Float`, `Array[..]` of those, and `Spread[..]` of all four).
    pub fn upper(traits: &[Trait]) -> Result<Trait, TraitError> {
        let (first, rest) = traits.split_first().ok_or(TraitError::EmptyPromotion)?;
        let mut acc = first.promotable_shapes()?;
        for t in rest {
            let shapes = t.promotable_shapes()?;
            let mut next = Vec::with_capacity(acc.len() * shapes.len());
            for a in &acc {
                for b in &shapes {
                    next.push(a.join(*b));
                }
            }
            acc = next;
        }
        Ok(Trait::union(acc.into_iter().map(Shape::to_trait)))
    }

    fn promotable_shapes(&self) -> Result<Vec<Shape>, TraitError> {
        let not_promotable = || TraitError::NotPromotable(self.to_string());
        match self {
            Trait::Union(members) => {
                let mut shapes = Vec::new();
                for m in members {
                    shapes.extend(m.promotable_shapes().map_err(|_| not_promotable())?);
                }
                Ok(shapes)
            }
            Trait::Kind(Kind::Integer) => Ok(vec![Shape::new(false, false, false)]),
            Trait::Kind(Kind::Float) => Ok(vec![Shape::new(false, false, true)]),
            Trait::Array(inner) => {
                let shapes = inner.promotable_shapes().map_err(|_| not_promotable())?;
                if shapes.iter().any(|s| s.array || s.spread) {
                    return Err(not_promotable());
                }
                Ok(shapes.into_iter().map(|s| Shape { array: true, ..s }).collect())
            }
            Trait::Spread(inner) => {
                let shapes = inner.promotable_shapes().map_err(|_| not_promotable())?;
                if shapes.iter().any(|s| s.spread) {
                    return Err(not_promotable());
                }
                Ok(shapes.into_iter().map(|s| Shape { spread: true, ..s }).collect())
            }
            _ => Err(not_promotable()),
        }
    }
}

/// One point of the promotion basis.
#[derive(Debug, Clone, Copy)]
struct Shape {
    spread: bool,
    array: bool,
    float: bool,
}

impl Shape {
    fn new(spread: bool, array: bool, float: bool) -> Self {
        Self { spread, array, float }
    }

    fn join(self, other: Shape) -> Shape {
        Shape::new(
            self.spread || other.spread,
            self.array || other.array,
            self.float || other.float,
        )
    }

    fn to_trait(self) -> Trait {
        let mut t = if self.float { Trait::FLOAT } else { Trait::INTEGER };
        if self.array {
            t = Trait::array(t);
        }
        if self.spread {
            t = Trait::spread(t);
        }
        t
    }
}

impl From<Kind> for Trait {
    fn from(kind: Kind) -> Self {
        Trait::Kind(kind)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Trait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, items: &[Trait], sep: &str| -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        };
        match self {
            Trait::Kind(kind) => write!(f, "{}", kind),
            Trait::Array(inner) => write!(f, "Array[{}]", inner),
            Trait::Any(inner) => write!(f, "Any[{}]", inner),
            Trait::Spread(inner) => write!(f, "Spread[{}]", inner),
            Trait::Optional(inner) => write!(f, "Optional[{}]", inner),
            Trait::Struct(members) => {
                f.write_str("Struct[")?;
                list(f, members, ", ")?;
                f.write_str("]")
            }
            Trait::Union(members) => list(f, members, " | "),
        }
    }
}

impl FromStr for Trait {
    type Err = TraitError;

    /// Parses a constant trait expression such as `"Spread[Array[Integer]]"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TraitExpr::parse(s)?.eval(&HashMap::new())
    }
}

impl Serialize for Trait {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Trait {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Trait {
        s.parse().unwrap()
    }

    #[test]
    fn test_kind_hierarchy() {
        assert!(Kind::Plate96.is_subkind_of(Kind::Labware));
        assert!(Kind::Plate96.is_subkind_of(Kind::Object));
        assert!(Kind::LiquidClass.is_subkind_of(Kind::String));
        assert!(Kind::Integer.is_subkind_of(Kind::Data));
        assert!(!Kind::Integer.is_subkind_of(Kind::Float));
        assert!(!Kind::Tube5.is_subkind_of(Kind::Plate));
        assert!(!Kind::Entity.is_subkind_of(Kind::Object));
    }

    #[test]
    fn test_spread_and_optional_acceptability() {
        assert!(t("Spread[Integer]").acceptable(&t("Spread[Real]")));
        assert!(!t("Spread[Integer]").acceptable(&t("Real")));
        assert!(!t("Optional[Integer]").acceptable(&t("Integer")));
        assert!(t("Optional[Integer]").acceptable(&t("Optional[Real]")));
    }

    #[test]
    fn test_union_rules() {
        // left union needs every member, right union needs one
        assert!(t("Integer | Float").acceptable(&t("Scalar")));
        assert!(!t("Integer | Plate96").acceptable(&t("Scalar")));
        assert!(t("Integer").acceptable(&t("Array[Real] | Real")));
        assert!(t("Array[Integer]").acceptable(&t("Array[Real] | Real")));
        assert!(!t("Array[Boolean]").acceptable(&t("Array[Real] | Real")));
    }

    #[test]
    fn test_generic_falls_back_to_category() {
        assert!(t("Array[Integer]").acceptable(&Trait::DATA));
        assert!(!t("Array[Integer]").acceptable(&Trait::SCALAR));
        assert!(t("Spread[Plate96]").acceptable(&Trait::ENTITY));
        assert!(!Trait::INTEGER.acceptable(&t("Array[Integer]")));
    }

    #[test]
    fn test_any_is_absorbing() {
        assert!(t("Plate96").is_object());
        assert!(t("Spread[Plate96]").is_object());
        assert!(t("Optional[Spread[Tube5]]").is_object());
        assert!(!t("Spread[Plate96]").is_data());
        assert!(t("Array[Float]").is_data());
        assert!(t("Spread[Optional[Integer]]").is_data());
        assert!(!t("Integer").is_object());
        assert!(t("Struct[Plate96, Integer]").is_object());
        assert!(!t("Struct[Integer, Float]").is_object());
    }

    #[test]
    fn test_any_accepts_by_element() {
        assert!(t("Any[Integer]").acceptable(&t("Any[Real]")));
        assert!(!t("Any[Real]").acceptable(&t("Any[Integer]")));
        assert!(t("Any[Plate96]").acceptable(&t("Any[Object]")));
    }

    #[test]
    fn test_acceptability_is_transitive() {
        let grid: Vec<Trait> = [
            "Entity",
            "Object",
            "Data",
            "Scalar",
            "Integer",
            "Float",
            "Real",
            "Labware",
            "Plate96",
            "Array[Integer]",
            "Array[Float]",
            "Array[Scalar]",
            "Array[Real] | Real",
            "Spread[Integer]",
            "Spread[Real]",
            "Spread[Array[Integer]]",
            "Optional[Integer]",
            "Optional[Real]",
            "Optional[Plate96]",
            "Struct[Plate96, Integer]",
            "Struct[Labware, Real]",
        ]
        .iter()
        .map(|s| t(s))
        .collect();

        for a in &grid {
            assert!(a.acceptable(a), "{} should accept itself", a);
            for b in &grid {
                if !a.acceptable(b) {
                    continue;
                }
                for c in &grid {
                    if b.acceptable(c) {
                        assert!(a.acceptable(c), "{} <= {} <= {} but not {} <= {}", a, b, c, a, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_upper() {
        assert_eq!(Trait::upper(&[t("Integer"), t("Float")]).unwrap(), t("Float"));
        assert_eq!(Trait::upper(&[t("Array[Integer]"), t("Float")]).unwrap(), t("Array[Float]"));
        assert_eq!(Trait::upper(&[t("Spread[Integer]"), t("Integer")]).unwrap(), t("Spread[Integer]"));
        assert_eq!(Trait::upper(&[t("Real"), t("Integer")]).unwrap(), Trait::real());
        assert_eq!(
            Trait::upper(&[t("Spread[Array[Integer]]"), t("Float")]).unwrap(),
            t("Spread[Array[Float]]")
        );
    }

    #[test]
    fn test_upper_rejects_non_numeric() {
        assert!(matches!(
            Trait::upper(&[t("Boolean"), t("Integer")]),
            Err(TraitError::NotPromotable(_))
        ));
        assert!(matches!(
            Trait::upper(&[t("Array[Spread[Integer]]")]),
            Err(TraitError::NotPromotable(_))
        ));
        assert!(matches!(Trait::upper(&[]), Err(TraitError::EmptyPromotion)));
    }

    #[test]
    fn test_first_arg() {
        assert_eq!(t("Array[Integer]").first_arg().unwrap(), &Trait::INTEGER);
        assert_eq!(t("Struct[Plate96]").first_arg().unwrap(), &Trait::PLATE96);
        assert!(Trait::INTEGER.first_arg().is_err());
        assert!(t("Struct[Plate96, Integer]").first_arg().is_err());
    }

    #[test]
    fn test_union_normalization_and_display() {
        let u = Trait::union([Trait::FLOAT, Trait::INTEGER, Trait::real()]);
        assert_eq!(u, Trait::real());
        assert_eq!(u.to_string(), "Integer | Float");
        assert_eq!(Trait::union([Trait::FLOAT]), Trait::FLOAT);
        assert_eq!(t("Struct[Plate96, Array[Float]]").to_string(), "Struct[Plate96, Array[Float]]");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_value(t("Spread[Optional[Integer]]")).unwrap();
        assert_eq!(json, serde_json::json!("Spread[Optional[Integer]]"));
        let back: Trait = serde_json::from_value(json).unwrap();
        assert_eq!(back, t("Spread[Optional[Integer]]"));
    }
}
