//! Scoped variable store
//!
//! Bindings live in stack frames. `define` always targets the top frame;
//! lookups scan from the top frame outward and stop at the first binding
//! that is either in the top frame or has [`Scope::Inherit`].

use super::error::{StateError, VmResult};
use super::stack::ExecutionStack;
use super::value::{FromValue, Scope, Value, Variable};

/// Variable accessor bound to a stack
pub struct Variables<'a> {
    stack: &'a mut ExecutionStack,
}

impl<'a> Variables<'a> {
    /// Wrap a stack
    pub fn new(stack: &'a mut ExecutionStack) -> Self {
        Self { stack }
    }

    /// Bind `name` in the top frame.
    pub fn define(&mut self, name: &str, value: impl Into<Value>, scope: Scope) -> VmResult<()> {
        let frame = self.stack.top_mut().ok_or(StateError::EmptyStack)?;
        frame.bind(Variable::new(name, scope, value.into()))
    }

    /// Typed lookup.
    pub fn get<T: FromValue>(&self, name: &str) -> VmResult<T> {
        let value = self.value(name)?;
        T::from_value(value).ok_or_else(|| {
            StateError::TypeMismatch {
                name: name.to_string(),
                expected: T::EXPECTED,
            }
            .into()
        })
    }

    /// Raw lookup.
    pub fn value(&self, name: &str) -> VmResult<&Value> {
        let (depth, slot) = self
            .stack
            .find_variable(name)
            .ok_or_else(|| StateError::NotDefined(name.to_string()))?;
        Ok(&self.stack.variable(depth, slot).value)
    }

    /// Boolean lookup
    pub fn get_bool(&self, name: &str) -> VmResult<bool> {
        self.get(name)
    }

    /// Integer lookup
    pub fn get_int(&self, name: &str) -> VmResult<i64> {
        self.get(name)
    }

    /// Number lookup; integers are accepted
    pub fn get_float(&self, name: &str) -> VmResult<f64> {
        self.get(name)
    }

    /// String lookup
    pub fn get_string(&self, name: &str) -> VmResult<String> {
        self.get(name)
    }

    /// Object lookup
    pub fn get_object(&self, name: &str) -> VmResult<serde_json::Value> {
        self.get(name)
    }

    /// Replace the value of a visible binding.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> VmResult<()> {
        let value = value.into();
        let (depth, slot) = self
            .stack
            .find_variable(name)
            .ok_or_else(|| StateError::NotDefined(name.to_string()))?;
        if !value.is_persistable() {
            return Err(StateError::NotPersistable(name.to_string()).into());
        }
        self.stack.variable_mut(depth, slot).value = value;
        Ok(())
    }

    /// Whether a binding is visible from the top frame.
    pub fn has(&self, name: &str) -> bool {
        self.stack.find_variable(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::activities::{Log, Sequence};
    use crate::vm::error::VmError;

    fn stack() -> ExecutionStack {
        let root = Sequence::new(vec![Sequence::new(vec![Log::new("leaf")])]);
        ExecutionStack::with_root(root)
    }

    #[test]
    fn test_define_and_get() {
        let mut stack = stack();
        let mut vars = Variables::new(&mut stack);
        vars.define("age", 40, Scope::Local).unwrap();
        vars.define("name", "Maks", Scope::Inherit).unwrap();

        assert_eq!(vars.get_int("age").unwrap(), 40);
        assert_eq!(vars.get_string("name").unwrap(), "Maks");
        assert_eq!(vars.get_float("age").unwrap(), 40.0);
    }

    #[test]
    fn test_redefinition_rejected() {
        let mut stack = stack();
        let mut vars = Variables::new(&mut stack);
        vars.define("age", 40, Scope::Local).unwrap();
        let err = vars.define("age", 41, Scope::Inherit).unwrap_err();
        assert!(matches!(err, VmError::State(StateError::AlreadyDefined(_))));
    }

    #[test]
    fn test_local_hidden_from_descendants() {
        let mut stack = stack();
        Variables::new(&mut stack)
            .define("secret", true, Scope::Local)
            .unwrap();
        Variables::new(&mut stack)
            .define("shared", true, Scope::Inherit)
            .unwrap();
        stack.push(0).unwrap();

        let mut vars = Variables::new(&mut stack);
        assert!(!vars.has("secret"));
        assert!(vars.has("shared"));
        assert!(matches!(
            vars.get_bool("secret"),
            Err(VmError::State(StateError::NotDefined(_)))
        ));
        assert!(matches!(
            vars.set("secret", false),
            Err(VmError::State(StateError::NotDefined(_)))
        ));
        vars.set("shared", false).unwrap();
        assert!(!vars.get_bool("shared").unwrap());
    }

    #[test]
    fn test_shadowing_in_child_frame() {
        let mut stack = stack();
        Variables::new(&mut stack)
            .define("x", 1, Scope::Inherit)
            .unwrap();
        stack.push(0).unwrap();
        let mut vars = Variables::new(&mut stack);
        vars.define("x", 2, Scope::Local).unwrap();
        assert_eq!(vars.get_int("x").unwrap(), 2);

        stack.pop().unwrap();
        assert_eq!(Variables::new(&mut stack).get_int("x").unwrap(), 1);
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let mut stack = stack();
        let mut vars = Variables::new(&mut stack);
        assert!(matches!(
            vars.define("ratio", f64::NAN, Scope::Local),
            Err(VmError::State(StateError::NotPersistable(_)))
        ));
        assert!(!vars.has("ratio"));

        vars.define("ratio", 0.5, Scope::Local).unwrap();
        assert!(matches!(
            vars.set("ratio", f64::INFINITY),
            Err(VmError::State(StateError::NotPersistable(_)))
        ));
        assert_eq!(vars.get_float("ratio").unwrap(), 0.5);
    }

    #[test]
    fn test_type_mismatch() {
        let mut stack = stack();
        let mut vars = Variables::new(&mut stack);
        vars.define("age", "forty", Scope::Local).unwrap();
        match vars.get_int("age") {
            Err(VmError::State(StateError::TypeMismatch { name, expected })) => {
                assert_eq!(name, "age");
                assert_eq!(expected, "integer");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
