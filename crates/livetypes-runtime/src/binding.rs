//! Library bindings: call exports by name with native-word arguments
//!
//! There are no declared signatures. Every argument and the result are a
//! single native word (`usize`). Marshalling richer values is done by the
//! caller through typed pointers and aggregates, passing their addresses.

use crate::callbacks::CallingConvention;
use crate::error::Result;
use crate::loader::LibraryLoader;
use crate::memory::Address;
use crate::native::ffi_abi;
use libffi::middle::{arg, Arg, Cif, CodePtr, Type};
use libloading::Library;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A resolved export
#[derive(Clone)]
pub struct ExportedFunction {
    name: String,
    address: Address,
    convention: CallingConvention,
    // keeps the code mapped
    _library: Arc<Library>,
}

impl ExportedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// Call with one native word per argument
    ///
    /// # Safety
    ///
    /// The export must accept exactly `args.len()` word-sized integer or
    /// pointer arguments under this convention, and any pointers passed
    /// must be valid for what the function does with them.
    pub unsafe fn call(&self, args: &[usize]) -> usize {
        let cif = Cif::new_with_abi(
            args.iter().map(|_| Type::usize()),
            Type::usize(),
            ffi_abi(self.convention),
        );
        let ffi_args: Vec<Arg> = args.iter().map(arg).collect();
        cif.call::<usize>(CodePtr::from_ptr(self.address.as_ptr() as *const _), &ffi_args)
    }
}

impl fmt::Debug for ExportedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedFunction")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("convention", &self.convention)
            .finish()
    }
}

/// A loaded library tagged with the convention its exports use
pub struct LibraryBinding {
    name: String,
    library: Arc<Library>,
    convention: CallingConvention,
    functions: Mutex<HashMap<String, ExportedFunction>>,
}

impl LibraryBinding {
    pub fn open(
        loader: &mut LibraryLoader,
        name: &str,
        convention: CallingConvention,
    ) -> Result<Self> {
        let library = loader.open(name)?;
        Ok(Self {
            name: name.to_string(),
            library,
            convention,
            functions: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// Resolve an export, once per name
    pub fn function(&self, symbol: &str) -> Result<ExportedFunction> {
        let mut functions = match self.functions.lock() {
            Ok(functions) => functions,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(function) = functions.get(symbol) {
            return Ok(function.clone());
        }

        let address = LibraryLoader::resolve(&self.library, &self.name, symbol)?;
        let function = ExportedFunction {
            name: symbol.to_string(),
            address,
            convention: self.convention,
            _library: self.library.clone(),
        };
        functions.insert(symbol.to_string(), function.clone());
        Ok(function)
    }

    /// Resolve and call in one step
    ///
    /// # Safety
    ///
    /// See `ExportedFunction::call`.
    pub unsafe fn call(&self, symbol: &str, args: &[usize]) -> Result<usize> {
        Ok(self.function(symbol)?.call(args))
    }

    pub fn resolved_count(&self) -> usize {
        self.functions.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl fmt::Debug for LibraryBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryBinding")
            .field("name", &self.name)
            .field("convention", &self.convention)
            .finish()
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::loader::LoadError;

    fn libc() -> LibraryBinding {
        let mut loader = LibraryLoader::new();
        LibraryBinding::open(&mut loader, "libc.so.6", CallingConvention::Cdecl).unwrap()
    }

    #[test]
    fn test_call_abs() {
        let binding = libc();
        let result = unsafe { binding.call("abs", &[(-5i32) as isize as usize]).unwrap() };
        assert_eq!(result as u32, 5);
    }

    #[test]
    fn test_functions_are_cached() {
        let binding = libc();
        let first = binding.function("abs").unwrap();
        let second = binding.function("abs").unwrap();
        assert_eq!(first.address(), second.address());
        assert_eq!(binding.resolved_count(), 1);
        assert_eq!(first.convention(), CallingConvention::Cdecl);
    }

    #[test]
    fn test_missing_symbol() {
        let binding = libc();
        let err = binding.function("definitely_not_exported").unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::SymbolNotFound { .. })));
        assert_eq!(binding.resolved_count(), 0);
    }
}
