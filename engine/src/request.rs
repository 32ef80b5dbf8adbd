//! Request building.
//!
//! Saving an object also saves the new objects it references. The builder
//! walks the object graph, picks every object with something to send and
//! orders them so that an object is sent only after the unsaved objects its
//! pending operations point at: their identifiers must exist before the
//! referrer's payload can be encoded.

use crate::{
    error::Result,
    ledger::{Generation, OperationTable},
    value::Pointer,
    ClassName, Error, LocalId, Object, Store,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// One object's pending operations, ready to send.
#[derive(Debug, Clone)]
pub struct Request {
    object: Object,
    generation: Generation,
    table: OperationTable,
    create: bool,
    dependencies: Vec<LocalId>,
}

impl Request {
    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn table(&self) -> &OperationTable {
        &self.table
    }

    /// Whether the object had no identifier when the request was built.
    pub fn is_create(&self) -> bool {
        self.create
    }

    /// Objects of the same batch that must be saved first.
    pub fn dependencies(&self) -> &[LocalId] {
        &self.dependencies
    }

    /// Encode the operation table, resolving pointers to current identifiers.
    pub fn payload(&self, store: &Store) -> Result<JsonMap<String, JsonValue>> {
        let mut encode = |pointer: &Pointer| encode_pointer(store, pointer);
        let mut payload = JsonMap::new();
        for (key, op) in &self.table {
            payload.insert(key.clone(), op.to_json_with(&mut encode)?);
        }
        Ok(payload)
    }
}

fn encode_pointer(store: &Store, pointer: &Pointer) -> Result<JsonValue> {
    if pointer.object_id().is_some() {
        return Ok(pointer.to_json());
    }
    let local_id = pointer
        .local_id()
        .ok_or_else(|| Error::UnsavedReference(pointer.class_name().to_string()))?;
    let object = store
        .get(local_id)
        .ok_or(Error::DanglingReference(local_id))?;
    let object_id = object
        .object_id()
        .ok_or_else(|| Error::UnsavedReference(pointer.class_name().to_string()))?;

    Ok(Pointer::remote(pointer.class_name(), object_id).to_json())
}

/// Requests for `root` alone.
pub fn build_shallow_requests(store: &Store, root: &Object) -> Result<Vec<Request>> {
    build_requests(store, root, 0)
}

/// Requests for `root` and every object reachable from it.
pub fn build_deep_requests(store: &Store, root: &Object) -> Result<Vec<Request>> {
    build_requests(store, root, -1)
}

/// Build the requests saving `root` and, depth permitting, its descendants.
///
/// `depth` 0 visits the root only, a negative depth is unbounded. Requests
/// come out in dependency order. Ledgers are snapshotted only once the
/// order is known, so a failed build leaves no generation in flight.
pub fn build_requests(store: &Store, root: &Object, depth: i32) -> Result<Vec<Request>> {
    let visited = walk(store, root, depth)?;

    let candidates: Vec<&Object> = visited
        .iter()
        .filter(|o| o.is_new() || o.has_pending())
        .collect();
    for object in &candidates {
        object.validate_required()?;
    }

    let index: HashMap<LocalId, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, o)| (o.local_id(), i))
        .collect();

    // dependencies[i]: unsaved candidates that candidate i's pending operations point at
    let dependencies: Vec<Vec<usize>> = candidates
        .iter()
        .map(|object| {
            let mut deps = BTreeSet::new();
            for op in object.pending().values() {
                for pointer in op.pointers() {
                    let Some(target) = store.resolve(pointer) else {
                        continue;
                    };
                    if let Some(&j) = index.get(&target.local_id()) {
                        if target.is_new() {
                            deps.insert(j);
                        }
                    }
                }
            }
            deps.into_iter().collect()
        })
        .collect();

    let order = topological_order(&dependencies).map_err(|stuck| {
        Error::CyclicUnsavedReference(
            stuck
                .into_iter()
                .map(|i| candidates[i].class_name().to_string())
                .collect::<Vec<ClassName>>(),
        )
    })?;

    Ok(order
        .into_iter()
        .map(|i| {
            let object = candidates[i];
            let create = object.is_new();
            let (generation, table) = object.snapshot();
            Request {
                object: object.clone(),
                generation,
                table,
                create,
                dependencies: dependencies[i]
                    .iter()
                    .map(|&j| candidates[j].local_id())
                    .collect(),
            }
        })
        .collect())
}

/// Breadth-first walk in visit order, each object once.
fn walk(store: &Store, root: &Object, depth: i32) -> Result<Vec<Object>> {
    let mut visited = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();

    seen.insert(root.local_id());
    queue.push_back((root.clone(), 0));

    while let Some((object, level)) = queue.pop_front() {
        let expand = depth < 0 || level < depth;
        if expand {
            for pointer in object.referenced_pointers() {
                match store.resolve(&pointer) {
                    Some(child) => {
                        if seen.insert(child.local_id()) {
                            queue.push_back((child, level + 1));
                        }
                    }
                    // Saved objects nobody holds have nothing pending.
                    None if pointer.object_id().is_some() => {}
                    None => {
                        return Err(match pointer.local_id() {
                            Some(local_id) => Error::DanglingReference(local_id),
                            None => Error::UnsavedReference(pointer.class_name().to_string()),
                        })
                    }
                }
            }
        }
        visited.push(object);
    }

    Ok(visited)
}

/// Kahn's algorithm; ties go to the lowest index. On a cycle, returns the
/// indices that could not be ordered.
fn topological_order(dependencies: &[Vec<usize>]) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let n = dependencies.len();
    let mut remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut dependents = vec![Vec::new(); n];
    for (i, deps) in dependencies.iter().enumerate() {
        for &j in deps {
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            remaining[d] -= 1;
            if remaining[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n).filter(|&i| remaining[i] > 0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{object::SaveOutcome, Value};
    use serde_json::json;

    fn saved(store: &Store, class_name: &str, id: &str) -> Object {
        store
            .rehydrate(class_name, &json!({ "objectId": id }))
            .unwrap()
    }

    fn commit(store: &Store, request: &Request, id: &str) {
        store
            .commit(
                request.object(),
                request.generation(),
                SaveOutcome {
                    object_id: Some(id.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn topological_order_prefers_visit_order() {
        assert_eq!(topological_order(&[vec![], vec![], vec![]]), Ok(vec![0, 1, 2]));
        assert_eq!(topological_order(&[vec![2], vec![], vec![]]), Ok(vec![1, 2, 0]));
        assert_eq!(topological_order(&[vec![1], vec![0], vec![]]), Err(vec![0, 1]));
    }

    #[test]
    fn new_object_without_changes_still_gets_a_request() {
        let store = Store::default();
        let object = store.create("Person");

        let requests = build_shallow_requests(&store, &object).unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_create());
        assert!(requests[0].table().is_empty());
    }

    #[test]
    fn saved_object_without_changes_is_skipped() {
        let store = Store::default();
        let object = saved(&store, "Person", "p1");
        assert!(build_deep_requests(&store, &object).unwrap().is_empty());
    }

    #[test]
    fn shallow_build_only_includes_root() {
        let store = Store::default();
        let parent = store.create("Person");
        let child = store.create("Person");
        parent.set("friend", &child).unwrap();

        let requests = build_shallow_requests(&store, &parent).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].object(), &parent);
    }

    #[test]
    fn children_are_ordered_before_parents() {
        let store = Store::default();
        let parent = store.create("Person");
        let child = store.create("Person");
        parent.set("friend", &child).unwrap();

        let requests = build_deep_requests(&store, &parent).unwrap();
        let objects: Vec<_> = requests.iter().map(|r| r.object().clone()).collect();
        assert_eq!(objects, vec![child.clone(), parent.clone()]);
        assert_eq!(requests[1].dependencies(), &[child.local_id()]);

        // Parent cannot be encoded before its child has an identifier.
        assert!(matches!(
            requests[1].payload(&store),
            Err(Error::UnsavedReference(_))
        ));

        commit(&store, &requests[0], "c1");
        let payload = requests[1].payload(&store).unwrap();
        assert_eq!(
            payload["friend"],
            json!({"__type": "Pointer", "className": "Person", "objectId": "c1"})
        );
    }

    #[test]
    fn saved_cycle_without_changes_yields_nothing() {
        let store = Store::default();
        let a = saved(&store, "Person", "a");
        let b = saved(&store, "Person", "b");
        a.set("friend", &b).unwrap();
        b.set("friend", &a).unwrap();
        for request in build_deep_requests(&store, &a).unwrap() {
            commit(&store, &request, "ignored");
        }

        assert!(build_deep_requests(&store, &a).unwrap().is_empty());
    }

    #[test]
    fn unsaved_cycle_fails() {
        let store = Store::default();
        let a = store.create("Person");
        let b = store.create("Pet");
        a.set("pet", &b).unwrap();
        b.set("owner", &a).unwrap();

        let result = build_deep_requests(&store, &a);
        assert!(matches!(result, Err(Error::CyclicUnsavedReference(classes)) if classes.len() == 2));
        assert_eq!(a.pending().len(), 1);
    }

    #[test]
    fn cycle_through_saved_object_is_ordered() {
        let store = Store::default();
        let saved_person = saved(&store, "Person", "s1");
        let fresh = store.create("Person");
        saved_person.set("friend", &fresh).unwrap();
        fresh.set("friend", &saved_person).unwrap();

        let requests = build_deep_requests(&store, &saved_person).unwrap();
        let objects: Vec<_> = requests.iter().map(|r| r.object().clone()).collect();
        assert_eq!(objects, vec![fresh, saved_person]);
    }

    #[test]
    fn depth_limits_descent() {
        let store = Store::default();
        let a = store.create("Node");
        let b = store.create("Node");
        let c = store.create("Node");
        a.set("next", &b).unwrap();
        b.set("next", &c).unwrap();

        assert_eq!(build_requests(&store, &a, 1).unwrap().len(), 2);
        assert_eq!(build_requests(&store, &a, -1).unwrap().len(), 3);
    }

    #[test]
    fn relation_members_are_walked() {
        let store = Store::default();
        let owner = saved(&store, "Person", "o1");
        let member = store.create("Person");
        owner.add_relation("friends", &member).unwrap();

        let requests = build_deep_requests(&store, &owner).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].object(), &member);

        commit(&store, &requests[0], "m1");
        let payload = requests[1].payload(&store).unwrap();
        assert_eq!(
            payload["friends"],
            json!({
                "__op": "AddRelation",
                "objects": [{"__type": "Pointer", "className": "Person", "objectId": "m1"}]
            })
        );
    }

    #[test]
    fn dangling_unsaved_reference_fails() {
        let store = Store::default();
        let parent = store.create("Person");
        {
            let child = store.create("Person");
            parent.set("friend", &child).unwrap();
        }

        assert!(matches!(
            build_deep_requests(&store, &parent),
            Err(Error::DanglingReference(_))
        ));
    }

    #[test]
    fn payload_encodes_operations() {
        let store = Store::default();
        let object = saved(&store, "Person", "p1");
        object.set("name", "foo").unwrap();
        object.increment("score", 2.0).unwrap();
        object.unset("nickname").unwrap();
        object
            .append_unique("tags", vec![Value::from("a")])
            .unwrap();

        let requests = build_shallow_requests(&store, &object).unwrap();
        assert!(!requests[0].is_create());
        assert_eq!(
            JsonValue::Object(requests[0].payload(&store).unwrap()),
            json!({
                "name": "foo",
                "score": {"__op": "Increment", "amount": 2},
                "nickname": {"__op": "Delete"},
                "tags": {"__op": "AddUnique", "objects": ["a"]},
            })
        );
    }
}
