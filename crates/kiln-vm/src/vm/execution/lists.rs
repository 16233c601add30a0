//! List instruction execution

use crate::error::{TrapKind, VmError};
use crate::opcode::{instruction::*, OpCode};
use crate::vm::result::ExecutionResult;
use crate::vm::Fiber;
use kiln_types::sync::Arc;
use kiln_types::{ElementType, SharedList, TypedList, Value};

impl Fiber {
    /// Execute list instructions
    pub(crate) fn execute_lists(
        &mut self,
        opcode: OpCode,
        instruction: u32,
    ) -> Result<ExecutionResult, VmError> {
        let a = decode_a(instruction);
        let b = decode_b(instruction);
        let c = decode_c(instruction);

        match opcode {
            OpCode::ListAlloc => {
                let capacity = self.int_operand(b)?;
                let capacity = usize::try_from(capacity)
                    .map_err(|_| TrapKind::IndexOutOfBounds { index: capacity, size: 0 })?;
                let list = TypedList::new(ElementType::Variant, 0);
                let list = match self.context.config().max_list_capacity {
                    Some(limit) if capacity > limit => {
                        return Err(VmError::ResourceExhausted(format!(
                            "list capacity {} exceeds limit {}",
                            capacity, limit
                        )))
                    }
                    Some(limit) => SharedList::with_max_capacity(list, limit),
                    None => SharedList::new(list),
                };
                list.lock().reserve(capacity);
                let list = self.context.registry().register_ref(Arc::new(list))?;
                self.set_register(a, Value::Ref(Some(list)))?;
            }

            OpCode::ListSize => {
                let size = self.list_operand(b)?.lock().size();
                self.set_register(a, Value::I32(size as i32))?;
            }

            OpCode::ListResize => {
                let size = self.int_operand(b)?;
                let size = usize::try_from(size)
                    .map_err(|_| TrapKind::IndexOutOfBounds { index: size, size: 0 })?;
                self.list_operand(a)?.resize(size)?;
            }

            OpCode::ListGet => {
                let list = self.list_operand(b)?;
                let index = self.int_operand(c)?;
                let value = {
                    let guard = list.lock();
                    guard.get_value(checked_index(index, guard.size())?)?
                };
                self.set_register(a, value)?;
            }

            OpCode::ListSet => {
                let list = self.list_operand(a)?;
                let index = self.int_operand(b)?;
                let value = self.get_register(c)?.clone();
                let previous = {
                    let mut guard = list.lock();
                    let index = checked_index(index, guard.size())?;
                    let previous = guard.get_value(index).ok();
                    guard.set_value(index, value)?;
                    previous
                };
                drop(previous);
            }

            OpCode::ListPush => {
                let value = self.get_register(b)?.clone();
                self.list_operand(a)?.push_value(value)?;
            }

            _ => unreachable!("Non-list opcode in list handler"),
        }

        Ok(ExecutionResult::Continue)
    }

    /// Resolve a register holding a list ref
    fn list_operand(&self, reg: u8) -> Result<Arc<SharedList>, VmError> {
        match self.get_register(reg)? {
            Value::Ref(Some(list)) => Ok(list.resolve::<SharedList>()?),
            Value::Ref(None) => Err(TrapKind::NullReference.into()),
            other => Err(VmError::type_mismatch(
                "ref<vm.list>",
                other.value_type().to_string(),
            )),
        }
    }

    /// Read an i32 or i64 register as a signed index or size
    fn int_operand(&self, reg: u8) -> Result<i64, VmError> {
        match self.get_register(reg)? {
            Value::I32(v) => Ok(*v as i64),
            Value::I64(v) => Ok(*v),
            other => Err(VmError::type_mismatch(
                "integer operand",
                other.value_type().to_string(),
            )),
        }
    }
}

fn checked_index(index: i64, size: usize) -> Result<usize, VmError> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < size)
        .ok_or_else(|| TrapKind::IndexOutOfBounds { index, size }.into())
}
