//! RAII ownership of a kernel handle.

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};

use crate::pump::push::NativeHandle;

/// Closes the wrapped handle when dropped
///
/// Used for handles the debugger created itself (duplicated stdio, the
/// process/thread handles `CreateProcessW` returns). Handles delivered by debug
/// events follow the event rules in the push pump instead.
#[derive(Debug)]
pub struct OwnedHandle(HANDLE);

impl OwnedHandle
{
    pub fn new(raw: HANDLE) -> Self
    {
        Self(raw)
    }

    pub fn raw(&self) -> HANDLE
    {
        self.0
    }
}

impl Drop for OwnedHandle
{
    fn drop(&mut self)
    {
        if NativeHandle(self.0 as isize).is_valid() {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}
