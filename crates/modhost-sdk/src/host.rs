//! Host imports. Off wasm32 these are in-process stand-ins so handler code
//! can be unit tested natively.

#[cfg(target_arch = "wasm32")]
mod imp {
    #[link(wasm_import_module = "modhost")]
    unsafe extern "C" {
        fn register_handler(handle: i32, kind: i32, name_ptr: i32, name_len: i32) -> i32;
        fn log(level: i32, ptr: i32, len: i32);
    }

    pub fn register(handle: i32, kind: i32, name: &str) -> i32 {
        // SAFETY: the host only reads `name_len` bytes at `name_ptr` during the call.
        unsafe { register_handler(handle, kind, name.as_ptr() as i32, name.len() as i32) }
    }

    pub fn write_log(level: i32, message: &str) {
        // SAFETY: as above.
        unsafe { log(level, message.as_ptr() as i32, message.len() as i32) }
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod imp {
    use std::cell::RefCell;

    thread_local! {
        static REGISTERED: RefCell<Vec<(i32, i32, String)>> = const { RefCell::new(Vec::new()) };
    }

    pub fn register(handle: i32, kind: i32, name: &str) -> i32 {
        if handle < 0 {
            return -1;
        }
        if name.is_empty() {
            return -2;
        }
        if !(0..=1).contains(&kind) {
            return -3;
        }
        REGISTERED.with(|r| r.borrow_mut().push((handle, kind, name.to_string())));
        0
    }

    pub fn write_log(level: i32, message: &str) {
        eprintln!("[modhost:{level}] {message}");
    }

    /// Calls that reached the stand-in `register_handler` on this thread.
    #[cfg(test)]
    pub fn take_registered() -> Vec<(i32, i32, String)> {
        REGISTERED.with(|r| std::mem::take(&mut *r.borrow_mut()))
    }
}

pub(crate) use imp::*;
