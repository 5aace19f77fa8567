use std::fmt;

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

/// One scripted conversation turn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioTurn {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ToolParameter {
    #[serde(rename = "type", default)]
    pub param_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Declared tool parameters, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolParameters(pub Vec<(String, ToolParameter)>);

impl ToolParameters {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ToolParameter)> {
        self.0.iter().map(|(name, param)| (name, param))
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }
}

impl Serialize for ToolParameters {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, param) in &self.0 {
            map.serialize_entry(name, param)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ToolParameters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = ToolParameters;

            fn expecting(
                &self,
                f: &mut fmt::Formatter,
            ) -> fmt::Result {
                f.write_str("a map of tool parameters")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<Self::Value, A::Error> {
                let mut params = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, param)) = access.next_entry::<String, ToolParameter>()? {
                    params.push((name, param));
                }
                Ok(ToolParameters(params))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// A script the model may call by name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub script: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: ToolParameters,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::ToolDefinition;

    #[test]
    fn test_parameters_keep_declaration_order() {
        let tool: ToolDefinition = serde_json::from_value(json!({
            "name": "sum",
            "script": "expr $1 + $2",
            "parameters": {
                "zeta": {"type": "number", "required": true},
                "alpha": {"type": "number"},
                "mid": {"description": "unused"}
            }
        }))
        .unwrap();

        let names: Vec<&str> = tool.parameters.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert!(tool.parameters.0[0].1.required);
        assert_eq!(tool.parameters.0[2].1.param_type, None);
    }
}
