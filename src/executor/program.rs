//! Composite program submitted through the batch-execute primitive.
//!
//! The scheduler only hands executors `(index, name, arguments)` triples.
//! How they are serialized for the remote side is up to the executor;
//! [`ExecuteProgram::render_script`] provides the script form understood by
//! remotes that accept `API.<method>(<args>)` programs.

use serde::Serialize;
use serde_json::Value;

use crate::scheduler::{Batch, CallArgs};

/// One sub-call of a composite program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramCall {
    pub index: usize,
    pub name: String,
    pub arguments: CallArgs,
    pub weight: u32,
}

/// Ordered sub-calls of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecuteProgram {
    calls: Vec<ProgramCall>,
}

impl ExecuteProgram {
    pub fn from_batch(batch: &Batch) -> Self {
        let calls = batch
            .members()
            .iter()
            .map(|m| ProgramCall {
                index: m.index,
                name: m.request.name.clone(),
                arguments: m.request.arguments.clone(),
                weight: m.request.weight,
            })
            .collect();
        Self { calls }
    }

    pub fn from_calls(calls: Vec<ProgramCall>) -> Self {
        Self { calls }
    }

    pub fn calls(&self) -> &[ProgramCall] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn total_weight(&self) -> u32 {
        self.calls.iter().map(|c| c.weight).sum()
    }

    /// Render as a script collecting `{"id", "res"}` pairs in index order.
    ///
    /// Null-valued arguments are omitted.
    pub fn render_script(&self) -> String {
        let mut code = String::from("var out = [];");
        for call in &self.calls {
            let args: serde_json::Map<String, Value> = call
                .arguments
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            code.push_str(&format!(
                "out.push({{\"id\":{}, \"res\":API.{}({})}});",
                call.index,
                call.name,
                Value::Object(args)
            ));
        }
        code.push_str("return out;");
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> CallArgs {
        match value {
            Value::Object(map) => map,
            _ => CallArgs::new(),
        }
    }

    #[test]
    fn render_script_lists_calls_in_index_order() {
        let program = ExecuteProgram::from_calls(vec![
            ProgramCall {
                index: 0,
                name: "users.get".into(),
                arguments: args(json!({"user_ids": "1"})),
                weight: 1,
            },
            ProgramCall {
                index: 1,
                name: "wall.get".into(),
                arguments: args(json!({"count": 10})),
                weight: 2,
            },
        ]);
        assert_eq!(
            program.render_script(),
            "var out = [];\
             out.push({\"id\":0, \"res\":API.users.get({\"user_ids\":\"1\"})});\
             out.push({\"id\":1, \"res\":API.wall.get({\"count\":10})});\
             return out;"
        );
        assert_eq!(program.total_weight(), 3);
    }

    #[test]
    fn render_script_omits_null_arguments() {
        let program = ExecuteProgram::from_calls(vec![ProgramCall {
            index: 0,
            name: "groups.getMembers".into(),
            arguments: args(json!({"group_id": "spacex", "offset": null})),
            weight: 1,
        }]);
        let script = program.render_script();
        assert!(script.contains("{\"group_id\":\"spacex\"}"));
        assert!(!script.contains("offset"));
    }

    #[test]
    fn empty_program_renders_empty_collector() {
        assert_eq!(ExecuteProgram::default().render_script(), "var out = [];return out;");
    }
}
