use graphql_parser::query::{Definition, OperationDefinition, parse_query};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// Operation kinds found in a GraphQL document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOutline {
    pub operations: Vec<(Option<String>, OperationKind)>,
}

impl QueryOutline {
    pub fn has_mutation(&self) -> bool {
        self.operations
            .iter()
            .any(|(_, kind)| *kind == OperationKind::Mutation)
    }

    /// Kind of the operation that would run for `operation_name`.
    ///
    /// Without a name the document must contain exactly one operation.
    pub fn selected_kind(&self, operation_name: Option<&str>) -> Option<OperationKind> {
        match operation_name {
            Some(wanted) => self
                .operations
                .iter()
                .find(|(name, _)| name.as_deref() == Some(wanted))
                .map(|(_, kind)| *kind),
            None if self.operations.len() == 1 => Some(self.operations[0].1),
            None => None,
        }
    }
}

/// Parses `query` and outlines its operations.
pub fn outline(query: &str) -> Result<QueryOutline, String> {
    let document =
        parse_query::<String>(query).map_err(|e| format!("Failed to parse query: {}", e))?;

    let mut outline = QueryOutline::default();
    for definition in &document.definitions {
        let Definition::Operation(op) = definition else {
            continue;
        };
        let (name, kind) = match op {
            OperationDefinition::SelectionSet(_) => (None, OperationKind::Query),
            OperationDefinition::Query(q) => (q.name.clone(), OperationKind::Query),
            OperationDefinition::Mutation(m) => (m.name.clone(), OperationKind::Mutation),
            OperationDefinition::Subscription(s) => (s.name.clone(), OperationKind::Subscription),
        };
        outline.operations.push((name, kind));
    }

    Ok(outline)
}

/// Returns true when the operation selected from `query` is a mutation.
///
/// Documents that do not parse are not classified here; the endpoint will
/// report the syntax error itself.
pub fn is_mutation(query: &str, operation_name: Option<&str>) -> bool {
    match outline(query) {
        Ok(outline) => match outline.selected_kind(operation_name) {
            Some(kind) => kind == OperationKind::Mutation,
            None => outline.has_mutation(),
        },
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn outlines_shorthand_query() {
        let outline = outline("{ users { id } products { id } }").unwrap();
        assert_eq!(outline.operations, vec![(None, OperationKind::Query)]);
        assert!(!outline.has_mutation());
    }

    #[test]
    fn detects_named_mutation() {
        let doc = r#"
            query Read { users { id } }
            mutation Write($input: CreateUserInput!) { createUser(input: $input) { id } }
        "#;
        assert!(is_mutation(doc, Some("Write")));
        assert!(!is_mutation(doc, Some("Read")));
        // ambiguous without a name: any mutation counts
        assert!(is_mutation(doc, None));
    }

    #[test]
    fn unparsable_documents_are_not_flagged() {
        assert!(outline("mutation {").is_err());
        assert!(!is_mutation("mutation {", None));
    }
}
