//! Backend-agnostic JIT capability set (spec.md §4.7/§9): emit-load,
//! emit-compare, emit-if, emit-do-while, embed-constant-pointer,
//! embed-struct-operations for indexes, finalize. The concrete
//! implementation lives in [`cranelift_backend`] -- the reference
//! implementation itself parameterizes over an asmjit/LLVM backend the
//! same way, just without a Rust trait to name the seam.

pub mod cranelift_backend;

/// ABI of a compiled query, mirroring the reference implementation's
/// `codegen_func_type`: given a half-open row range `[lower, upper)` over
/// the pipeline's outer scan and a pointer to a `sums` buffer sized to
/// the query's selection count, accumulate into `sums` and return the
/// number of matching tuples.
pub type CompiledQueryFn = unsafe extern "C" fn(u64, u64, *mut u64) -> u64;

/// A finalized, callable compiled query. Keeps the owning JIT module
/// alive for as long as the function pointer may be invoked -- dropping
/// this before the last call returns would be a use-after-free.
pub struct CompiledQuery {
    // Order matters: `module` must outlive `func`'s last use. Rust drops
    // fields in declaration order, so keep `func` first; it's Copy and
    // holds no allocation of its own.
    func: CompiledQueryFn,
    #[allow(dead_code)] // kept alive for `func`'s backing code pages
    module: cranelift_jit::JITModule,
}

// Safety: once `finalize_definitions` has run, a `JITModule`'s code and
// data pages are immutable for the module's remaining lifetime; nothing
// in this crate ever declares further functions into it after `compile`
// returns. `run_morsels` shares a `&CompiledQuery` across the rayon
// thread pool purely to call the already-finalized function pointer.
unsafe impl Sync for CompiledQuery {}

impl CompiledQuery {
    pub(crate) fn new(module: cranelift_jit::JITModule, func: CompiledQueryFn) -> Self {
        CompiledQuery { func, module }
    }

    /// Run the compiled query over `[lower, upper)`, accumulating into
    /// `sums`. The caller (the executor) guarantees `upper` does not
    /// exceed the outer relation's tuple count and `sums.len()` matches
    /// the query's selection count.
    pub fn call(&self, lower: u64, upper: u64, sums: &mut [u64]) -> u64 {
        // Safety: `func` was produced by this module's own codegen for
        // exactly this `sums` layout, and `module` (kept alive above)
        // still owns the executable pages `func` points into.
        unsafe { (self.func)(lower, upper, sums.as_mut_ptr()) }
    }
}
