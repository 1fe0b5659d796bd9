//! Raw exports behind [`export!`](crate::export). Guest pointers are 32-bit,
//! so these are only meaningful on wasm32.

use std::alloc::{Layout, alloc as raw_alloc, dealloc as raw_dealloc};

use crate::registry::{self, Registrar};

pub fn register(handle: i32, f: fn(&mut Registrar)) {
    let mut registrar = Registrar::new(handle);
    f(&mut registrar);
}

/// Allocate `len` bytes for the host to write into.
pub fn alloc(len: i32) -> i32 {
    let len = len.max(0) as usize;
    if len == 0 {
        return 1;
    }
    match Layout::array::<u8>(len) {
        // SAFETY: the layout has a non-zero size.
        Ok(layout) => unsafe { raw_alloc(layout) as usize as i32 },
        Err(_) => 0,
    }
}

/// Free a block returned by [`alloc`] or by [`invoke`].
pub fn dealloc(ptr: i32, len: i32) {
    if ptr == 0 || len <= 0 {
        return;
    }
    if let Ok(layout) = Layout::array::<u8>(len as usize) {
        // SAFETY: the host hands back pointers this module allocated with the same length.
        unsafe { raw_dealloc(ptr as usize as *mut u8, layout) }
    }
}

/// Run a handler and return the packed location of its response envelope.
pub fn invoke(name_ptr: i32, name_len: i32, input_ptr: i32, input_len: i32) -> i64 {
    // SAFETY: the host wrote these ranges through `alloc` just before the call.
    let name = unsafe { guest_bytes(name_ptr, name_len) };
    let input = unsafe { guest_bytes(input_ptr, input_len) };
    let envelope = match std::str::from_utf8(name) {
        Ok(name) => registry::dispatch(name, input),
        Err(_) => br#"{"error":"handler name is not utf-8"}"#.to_vec(),
    };

    let ptr = alloc(envelope.len() as i32);
    if ptr == 0 {
        return 0;
    }
    // SAFETY: `ptr` points at a fresh block of `envelope.len()` bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(envelope.as_ptr(), ptr as usize as *mut u8, envelope.len());
    }
    pack(ptr, envelope.len() as i32)
}

unsafe fn guest_bytes<'a>(ptr: i32, len: i32) -> &'a [u8] {
    if len <= 0 {
        return &[];
    }
    // SAFETY: upheld by the caller.
    unsafe { std::slice::from_raw_parts(ptr as usize as *const u8, len as usize) }
}

/// `ptr << 32 | len`.
pub fn pack(ptr: i32, len: i32) -> i64 {
    (((ptr as u32 as u64) << 32) | len as u32 as u64) as i64
}
