//! modhost SDK: what a module crate links to become loadable by the host.
//!
//! A module is a `cdylib` built for `wasm32-wasip1`. It names its workflows
//! and activities in one registration function and lets [`export!`] emit the
//! symbols the host looks for (`modhost_register`, `modhost_alloc`,
//! `modhost_dealloc`, `modhost_invoke`).
//!
//! ```rust,no_run
//! use modhost_sdk::prelude::*;
//!
//! fn greet(input: Value) -> HandlerResult {
//!     let name = input["name"].as_str().unwrap_or("world");
//!     Ok(json!(format!("Hello, {name}!")))
//! }
//!
//! fn register(reg: &mut Registrar) {
//!     if let Err(e) = reg.activity("Greet", greet) {
//!         modhost_sdk::log::error(&format!("register Greet: {e}"));
//!     }
//! }
//!
//! modhost_sdk::export!(register);
//! ```

mod host;
mod registry;

pub mod error;

#[doc(hidden)]
pub mod abi;

/// Re-exports for `use modhost_sdk::prelude::*`.
pub mod prelude {
    pub use crate::error::{HandlerError, HandlerResult, RegisterError};
    pub use crate::registry::{Kind, Registrar};
    pub use serde_json::{Value, json};
}

pub use error::{HandlerError, HandlerResult, RegisterError};
pub use registry::{HandlerFn, Kind, Registrar, dispatch};

/// Diagnostics routed into the host's log.
pub mod log {
    pub fn error(message: &str) {
        crate::host::write_log(0, message);
    }

    pub fn warn(message: &str) {
        crate::host::write_log(1, message);
    }

    pub fn info(message: &str) {
        crate::host::write_log(2, message);
    }

    pub fn debug(message: &str) {
        crate::host::write_log(3, message);
    }
}

/// Emit the host-facing exports around a registration function of type
/// `fn(&mut Registrar)`.
#[macro_export]
macro_rules! export {
    ($register:path) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn modhost_register(handle: i32) {
            $crate::abi::register(handle, $register);
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn modhost_alloc(len: i32) -> i32 {
            $crate::abi::alloc(len)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn modhost_dealloc(ptr: i32, len: i32) {
            $crate::abi::dealloc(ptr, len)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn modhost_invoke(
            name_ptr: i32,
            name_len: i32,
            input_ptr: i32,
            input_len: i32,
        ) -> i64 {
            $crate::abi::invoke(name_ptr, name_len, input_ptr, input_len)
        }
    };
}
