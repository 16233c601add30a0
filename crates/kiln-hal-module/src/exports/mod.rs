//! Export table of the `hal` module.
//!
//! Names follow `<object>.<operation>`; the calling convention string after
//! each name is checked against every importing module at link time.

pub mod buffer;
pub mod command_buffer;
pub mod device;
pub mod executable;
pub mod semaphore;

use kiln_vm::native::NativeModuleBuilder;
use kiln_vm::VmError;

/// Register every export on `builder`
pub fn register_all(builder: NativeModuleBuilder) -> Result<NativeModuleBuilder, VmError> {
    builder
        // ====================================================================
        // Device
        // ====================================================================
        .function("ex.shared_device", "0v_r", device::shared_device)?
        .function("ex.submit_and_wait", "0rr_v", device::submit_and_wait)?
        .function("device.query.i64", "0ri_iI", device::query_i64)?
        .function("device.queue.execute", "0rrrr_v", device::queue_execute)?
        // ====================================================================
        // Buffers and views
        // ====================================================================
        .function("device.allocator", "0r_r", buffer::device_allocator)?
        .function("allocator.allocate", "0riiI_r", buffer::allocate)?
        .function("buffer.length", "0r_I", buffer::length)?
        .function("buffer.subspan", "0rII_r", buffer::subspan)?
        .function("buffer.load", "0rIi_i", buffer::load)?
        .function("buffer.store", "0irIi_v", buffer::store)?
        .function("buffer_view.create", "0riir_r", buffer::view_create)?
        .function("buffer_view.buffer", "0r_r", buffer::view_buffer)?
        .function("buffer_view.element_type", "0r_i", buffer::view_element_type)?
        .function("buffer_view.rank", "0r_i", buffer::view_rank)?
        .function("buffer_view.dim", "0ri_I", buffer::view_dim)?
        .function("buffer_view.byte_length", "0r_I", buffer::view_byte_length)?
        // ====================================================================
        // Command buffers and events
        // ====================================================================
        .function("command_buffer.create", "0rii_r", command_buffer::create)?
        .function("command_buffer.begin", "0r_v", command_buffer::begin)?
        .function("command_buffer.end", "0r_v", command_buffer::end)?
        .function("command_buffer.fill_buffer", "0rrIIii_v", command_buffer::fill_buffer)?
        .function("command_buffer.copy_buffer", "0rrIrII_v", command_buffer::copy_buffer)?
        .function("command_buffer.update_buffer", "0rrIrII_v", command_buffer::update_buffer)?
        .function(
            "command_buffer.execution_barrier",
            "0r_v",
            command_buffer::execution_barrier,
        )?
        .function("command_buffer.signal_event", "0rr_v", command_buffer::signal_event)?
        .function("command_buffer.reset_event", "0rr_v", command_buffer::reset_event)?
        .function(
            "command_buffer.bind_descriptor_set",
            "0rrir_v",
            command_buffer::bind_descriptor_set,
        )?
        .function("command_buffer.push_constants", "0rrir_v", command_buffer::push_constants)?
        .function("command_buffer.dispatch", "0rriiii_v", command_buffer::dispatch)?
        .function("event.create", "0r_r", command_buffer::event_create)?
        // ====================================================================
        // Executables
        // ====================================================================
        .function(
            "descriptor_set_layout.create",
            "0ri_r",
            executable::descriptor_set_layout_create,
        )?
        .function("descriptor_set.create", "0rrr_r", executable::descriptor_set_create)?
        .function("executable_layout.create", "0rir_r", executable::executable_layout_create)?
        .function("executable_cache.create", "0r_r", executable::executable_cache_create)?
        .function("executable_cache.prepare", "0rrrr_r", executable::executable_cache_prepare)?
        // ====================================================================
        // Semaphores and fences
        // ====================================================================
        .function("semaphore.create", "0rI_r", semaphore::create)?
        .function("semaphore.query", "0r_iI", semaphore::query)?
        .function("semaphore.signal", "0rI_v", semaphore::signal)?
        .function("semaphore.fail", "0ri_v", semaphore::fail)?
        .function("semaphore.await", "0rII_i", semaphore::await_value)?
        .function("fence.create", "0rI_r", semaphore::fence_create)?
        .function("fence.join", "0rr_r", semaphore::fence_join)?
        .function("fence.query", "0r_i", semaphore::fence_query)?
        .function("fence.await", "0rI_i", semaphore::fence_await)
}
