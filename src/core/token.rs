use crate::core::NodeValue;
use crate::core::traits::Trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A value travelling along one edge, tagged with its trait.
///
/// Object tokens stand for physical things and are consumed exactly once;
/// data tokens may be copied freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub value: NodeValue,
    pub traits: Trait,
}

impl Token {
    pub fn new(value: impl Into<NodeValue>, traits: Trait) -> Self {
        Self {
            value: value.into(),
            traits,
        }
    }

    pub fn is_object(&self) -> bool {
        self.traits.is_object()
    }

    /// Splits a spread token into one token per element.
    pub fn elements(&self) -> Option<Vec<Token>> {
        let Trait::Spread(inner) = &self.traits else {
            return None;
        };
        let items = self.value.as_array()?;
        Some(
            items
                .iter()
                .map(|v| Token::new(v.clone(), (**inner).clone()))
                .collect(),
        )
    }
}

/// Port name to token.
pub type TokenMap = HashMap<String, Token>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_serializes_trait_as_string() {
        let token = Token::new(8, Trait::INTEGER);
        assert_eq!(
            serde_json::to_value(&token).unwrap(),
            json!({"value": 8, "traits": "Integer"})
        );
    }

    #[test]
    fn test_elements() {
        let token = Token::new(json!([1, 2]), Trait::spread(Trait::INTEGER));
        let items = token.elements().unwrap();
        assert_eq!(items, vec![Token::new(1, Trait::INTEGER), Token::new(2, Trait::INTEGER)]);
        assert!(Token::new(1, Trait::INTEGER).elements().is_none());
    }
}
