//! Typed pop helpers for the operand stack, reducing boilerplate in the
//! executor's opcode handlers.

use super::error::VmError;
use super::value::Value;

/// Convenience push/pop methods for the operand stack (`Vec<Value>`).
/// `push_value` irefs on the way in; `pop_value` pops without dereferencing
/// — ownership passes to the caller, matching the "pop-without-dref" mode
/// spec §3 describes for handing a value off rather than discarding it. A
/// caller that discards a popped value outright (rather than re-storing it
/// somewhere) is responsible for calling `.deref()` itself.
pub trait StackOps {
    fn push_value(&mut self, val: Value);
    fn pop_value(&mut self) -> Result<Value, VmError>;
    fn pop_int(&mut self) -> Result<i64, VmError>;
    fn pop_float(&mut self) -> Result<f64, VmError>;
    fn pop_bool(&mut self) -> Result<bool, VmError>;
    fn pop_str(&mut self) -> Result<String, VmError>;
}

impl StackOps for Vec<Value> {
    fn push_value(&mut self, val: Value) {
        val.iref();
        self.push(val);
    }

    fn pop_value(&mut self) -> Result<Value, VmError> {
        self.pop().ok_or_else(|| VmError::exec("operand stack underflow"))
    }

    fn pop_int(&mut self) -> Result<i64, VmError> {
        let v = self.pop_value()?;
        v.as_int()
            .ok_or_else(|| VmError::type_error_expected("pop_int", "Int", v.value_type()))
    }

    fn pop_float(&mut self) -> Result<f64, VmError> {
        let v = self.pop_value()?;
        v.as_float()
            .ok_or_else(|| VmError::type_error_expected("pop_float", "Float", v.value_type()))
    }

    fn pop_bool(&mut self) -> Result<bool, VmError> {
        let v = self.pop_value()?;
        v.as_bool()
            .ok_or_else(|| VmError::type_error_expected("pop_bool", "Bool", v.value_type()))
    }

    fn pop_str(&mut self) -> Result<String, VmError> {
        let v = self.pop_value()?;
        let s = v
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| VmError::type_error_expected("pop_str", "String", v.value_type()));
        drop(v);
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_irefs_pop_hands_off_without_deref() {
        let mut stack: Vec<Value> = Vec::new();
        let v = Value::int_val(1, 0, 0);
        stack.push_value(v.clone());
        assert_eq!(v.refcount(), 2);
        let popped = stack.pop_value().unwrap();
        assert_eq!(popped.refcount(), 2);
        popped.deref();
        assert_eq!(v.refcount(), 1);
    }

    #[test]
    fn pop_int_rejects_wrong_type() {
        let mut stack: Vec<Value> = Vec::new();
        stack.push_value(Value::str_val("x", 0, 0));
        assert!(stack.pop_int().is_err());
    }
}
