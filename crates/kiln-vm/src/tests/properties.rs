use super::helpers::{context, invoke, single_function};
use crate::builder::FunctionBuilder;
use crate::opcode::OpCode;
use kiln_types::Value;
use proptest::prelude::*;

fn binary_op(op: OpCode) -> crate::module::Module {
    single_function("op", |_| {
        let mut f = FunctionBuilder::new("op", "0ii_i").unwrap();
        f.abc(op, 0, 0, 1).ret(0);
        f
    })
}

proptest! {
    #[test]
    fn prop_integer_ops_wrap(a in any::<i32>(), b in any::<i32>()) {
        let add = context(vec![binary_op(OpCode::Add)]);
        let sub = context(vec![binary_op(OpCode::Sub)]);
        let mul = context(vec![binary_op(OpCode::Mul)]);
        let args = vec![Value::I32(a), Value::I32(b)];

        prop_assert_eq!(invoke(&add, "test.op", args.clone()).unwrap(), vec![Value::I32(a.wrapping_add(b))]);
        prop_assert_eq!(invoke(&sub, "test.op", args.clone()).unwrap(), vec![Value::I32(a.wrapping_sub(b))]);
        prop_assert_eq!(invoke(&mul, "test.op", args).unwrap(), vec![Value::I32(a.wrapping_mul(b))]);
    }

    #[test]
    fn prop_unsigned_division(a in any::<i32>(), b in 1u32..) {
        let ctx = context(vec![binary_op(OpCode::DivU)]);
        let result = invoke(&ctx, "test.op", vec![Value::I32(a), Value::I32(b as i32)]).unwrap();
        prop_assert_eq!(result, vec![Value::I32(((a as u32) / b) as i32)]);
    }
}
