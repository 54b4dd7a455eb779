//! Cranelift JIT backend: fuses an entire operator chain into one
//! native function per query (spec.md §4.7).
//!
//! Index probes (bitset membership, unique/multi hash lookup) are too
//! structured to hand-emit as raw Cranelift IR, so the generated code
//! calls back into small `extern "C"` trampolines over the same
//! `Bitset`/`DenseUniqueIndex`/`DenseMultiIndex` structures the
//! interpreter uses, with the structure's address embedded as an
//! `iconst` -- the Rust equivalent of the reference implementation
//! embedding a raw hash-table pointer as an immediate in the generated
//! machine code.

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags, Signature, Value};
use cranelift_codegen::isa::CallConv;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::verifier::verify_function;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};

use crate::codegen::{CompiledQuery, CompiledQueryFn};
use crate::errors::{EngineError, Result};
use crate::index::{Bitset, DenseMultiIndex, DenseUniqueIndex, HashIndex};
use crate::plan::{self, PredicateKind};
use crate::query::{Comparison, Query};
use crate::relation::{Column, Relation, Width};

/// Column value loads need the column's width to pick the right integer
/// load instruction; we always widen to I64 in the generated code, same
/// as the interpreter's `Column::load`.
unsafe extern "C" fn host_load(ptr: *const u8, width: u8, idx: u64) -> u64 {
    match width {
        0 => *(ptr as *const u16).add(idx as usize) as u64,
        1 => *(ptr as *const u32).add(idx as usize) as u64,
        _ => *(ptr as *const u64).add(idx as usize),
    }
}

unsafe extern "C" fn host_bitset_contains(bitset: *const Bitset, value: u64) -> u8 {
    u8::from((*bitset).contains(value))
}

const ABSENT_ROW: u64 = u64::MAX;

unsafe extern "C" fn host_unique_lookup(index: *const DenseUniqueIndex, value: u64) -> u64 {
    (*index).lookup(value).unwrap_or(ABSENT_ROW)
}

unsafe extern "C" fn host_multi_lookup_len(index: *const DenseMultiIndex, value: u64) -> u64 {
    (*index).lookup(value).len() as u64
}

unsafe extern "C" fn host_multi_lookup_ptr(index: *const DenseMultiIndex, value: u64) -> *const u32 {
    (*index).lookup(value).as_ptr()
}

fn width_tag(width: Width) -> u8 {
    match width {
        Width::U16 => 0,
        Width::U32 => 1,
        Width::U64 => 2,
    }
}

/// Per-query codegen state: the function builder, the row-id variable
/// per binding, the running sum variables, and handles to the host
/// trampolines declared into this module.
struct Emitter<'a> {
    builder: FunctionBuilder<'a>,
    row_ids: Vec<Variable>,
    sums: Vec<Variable>,
    amount: Variable,
    sums_ptr: Value,
    load_fn: cranelift_codegen::ir::FuncRef,
    bitset_fn: cranelift_codegen::ir::FuncRef,
    unique_fn: cranelift_codegen::ir::FuncRef,
    multi_len_fn: cranelift_codegen::ir::FuncRef,
    multi_ptr_fn: cranelift_codegen::ir::FuncRef,
}

impl Emitter<'_> {
    fn const_ptr(&mut self, ptr: *const u8) -> Value {
        self.builder.ins().iconst(types::I64, ptr as i64)
    }

    fn load_column(&mut self, column: &Column, row: Value) -> Value {
        let (ptr, width) = column.raw_parts();
        let ptr_val = self.const_ptr(ptr);
        let width_val = self.builder.ins().iconst(types::I8, i64::from(width_tag(width)));
        let call = self.builder.ins().call(self.load_fn, &[ptr_val, width_val, row]);
        self.builder.inst_results(call)[0]
    }

    fn load_binding_row(&mut self, binding: usize) -> Value {
        self.builder.use_var(self.row_ids[binding])
    }
}

/// Compile an already-rewritten query into a fused native function.
/// `relations` must already have indexes built (`index_builder::precompute_all`).
pub fn compile(query: &Query, relations: &[Relation]) -> Result<CompiledQuery> {
    let mut flag_builder = settings::builder();
    flag_builder.set("use_colocated_libcalls", "false").expect("valid setting");
    flag_builder.set("is_pic", "false").expect("valid setting");
    flag_builder.set("opt_level", "speed").expect("valid setting");
    let isa_builder = cranelift_native::builder().map_err(|msg| EngineError::JitVerification(msg.to_string()))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| EngineError::JitVerification(e.to_string()))?;

    let mut jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    jit_builder.symbol("jb_load", host_load as *const u8);
    jit_builder.symbol("jb_bitset_contains", host_bitset_contains as *const u8);
    jit_builder.symbol("jb_unique_lookup", host_unique_lookup as *const u8);
    jit_builder.symbol("jb_multi_lookup_len", host_multi_lookup_len as *const u8);
    jit_builder.symbol("jb_multi_lookup_ptr", host_multi_lookup_ptr as *const u8);
    let mut module = JITModule::new(jit_builder);

    let mut ctx = module.make_context();
    let mut sig = Signature::new(CallConv::SystemV);
    sig.params.push(AbiParam::new(types::I64)); // lower
    sig.params.push(AbiParam::new(types::I64)); // upper
    sig.params.push(AbiParam::new(types::I64)); // sums_ptr
    sig.returns.push(AbiParam::new(types::I64)); // amount
    ctx.func.signature = sig.clone();

    let load_id = declare_host_fn(&mut module, "jb_load", &[types::I64, types::I8, types::I64], Some(types::I64))?;
    let bitset_id = declare_host_fn(&mut module, "jb_bitset_contains", &[types::I64, types::I64], Some(types::I8))?;
    let unique_id = declare_host_fn(&mut module, "jb_unique_lookup", &[types::I64, types::I64], Some(types::I64))?;
    let multi_len_id =
        declare_host_fn(&mut module, "jb_multi_lookup_len", &[types::I64, types::I64], Some(types::I64))?;
    let multi_ptr_id =
        declare_host_fn(&mut module, "jb_multi_lookup_ptr", &[types::I64, types::I64], Some(types::I64))?;

    let mut builder_ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);

    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    let lower = builder.block_params(entry)[0];
    let upper = builder.block_params(entry)[1];
    let sums_ptr = builder.block_params(entry)[2];

    let load_fn = module.declare_func_in_func(load_id, builder.func);
    let bitset_fn = module.declare_func_in_func(bitset_id, builder.func);
    let unique_fn = module.declare_func_in_func(unique_id, builder.func);
    let multi_len_fn = module.declare_func_in_func(multi_len_id, builder.func);
    let multi_ptr_fn = module.declare_func_in_func(multi_ptr_id, builder.func);

    let row_ids: Vec<Variable> = (0..query.num_bindings())
        .map(|i| {
            let var = Variable::new(i);
            builder.declare_var(var, types::I64);
            var
        })
        .collect();
    let sums: Vec<Variable> = (0..query.selections.len())
        .map(|i| {
            let var = Variable::new(query.num_bindings() + i);
            builder.declare_var(var, types::I64);
            let zero = builder.ins().iconst(types::I64, 0);
            builder.def_var(var, zero);
            var
        })
        .collect();
    let amount = Variable::new(query.num_bindings() + query.selections.len());
    builder.declare_var(amount, types::I64);
    let zero = builder.ins().iconst(types::I64, 0);
    builder.def_var(amount, zero);

    let mut emitter = Emitter {
        builder,
        row_ids,
        sums,
        amount,
        sums_ptr,
        load_fn,
        bitset_fn,
        unique_fn,
        multi_len_fn,
        multi_ptr_fn,
    };

    emit_scan_loop(&mut emitter, query, relations, lower, upper)?;

    // Write accumulated sums to the output buffer and return the count.
    for (i, sum_var) in emitter.sums.clone().iter().enumerate() {
        let value = emitter.builder.use_var(*sum_var);
        let offset = i as i32 * 8;
        emitter.builder.ins().store(MemFlags::trusted(), value, emitter.sums_ptr, offset);
    }
    let amount_value = emitter.builder.use_var(emitter.amount);
    emitter.builder.ins().return_(&[amount_value]);
    emitter.builder.finalize();

    if let Err(errors) = verify_function(&ctx.func, module.isa().flags()) {
        return Err(EngineError::JitVerification(errors.to_string()));
    }

    let func_id = module.declare_function("query", Linkage::Local, &sig)?;
    module.define_function(func_id, &mut ctx)?;
    module.clear_context(&mut ctx);
    module.finalize_definitions()?;

    let code_ptr = module.get_finalized_function(func_id);
    // Safety: `code_ptr` was just finalized by this module with exactly
    // the `(i64, i64, i64) -> i64` signature declared above, which
    // matches `CompiledQueryFn`'s ABI.
    let func: CompiledQueryFn = unsafe { std::mem::transmute::<*const u8, CompiledQueryFn>(code_ptr) };

    Ok(CompiledQuery::new(module, func))
}

fn declare_host_fn(
    module: &mut JITModule,
    name: &str,
    params: &[types::Type],
    ret: Option<types::Type>,
) -> Result<cranelift_module::FuncId> {
    let mut sig = Signature::new(CallConv::SystemV);
    for &p in params {
        sig.params.push(AbiParam::new(p));
    }
    if let Some(r) = ret {
        sig.returns.push(AbiParam::new(r));
    }
    Ok(module.declare_function(name, Linkage::Import, &sig)?)
}

/// Emit the outer scan as a row-counted loop over `[lower, upper)`,
/// aliasing `lower` as binding 0's row id the way the reference
/// implementation's `ScanOperator::codegen` aliases its loop variable.
/// Unlike that do-while, this is a guarded while-loop, so an empty
/// morsel (`lower == upper`) correctly runs zero iterations.
fn emit_scan_loop(emitter: &mut Emitter, query: &Query, relations: &[Relation], lower: Value, upper: Value) -> Result<()> {
    let header = emitter.builder.create_block();
    let body = emitter.builder.create_block();
    let exit = emitter.builder.create_block();

    emitter.builder.ins().jump(header, &[]);
    emitter.builder.switch_to_block(header);

    let idx_var = emitter.row_ids[0];
    emitter.builder.def_var(idx_var, lower);

    // Re-enter the header from the body via a back edge, so declare it
    // unsealed until the body's jump back is emitted below.
    let idx = emitter.builder.use_var(idx_var);
    let continue_loop = emitter.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::UnsignedLessThan, idx, upper);
    emitter.builder.ins().brif(continue_loop, body, &[], exit, &[]);

    emitter.builder.switch_to_block(body);
    emitter.builder.seal_block(body);

    emit_filters_then(emitter, query, relations, 0, &mut |emitter| {
        if query.predicates.is_empty() {
            emit_projection(emitter, query, relations)
        } else {
            emit_predicate(emitter, query, relations, 0)
        }
    })?;

    let idx = emitter.builder.use_var(idx_var);
    let one = emitter.builder.ins().iconst(types::I64, 1);
    let next_idx = emitter.builder.ins().iadd(idx, one);
    emitter.builder.def_var(idx_var, next_idx);
    emitter.builder.ins().jump(header, &[]);

    emitter.builder.seal_block(header);
    emitter.builder.switch_to_block(exit);
    emitter.builder.seal_block(exit);
    Ok(())
}

/// Emit every filter on `binding` as a nested chain of `if`s, then `rest`
/// inside the innermost one. With no filters on this binding, just runs
/// `rest` directly.
fn emit_filters_then(
    emitter: &mut Emitter,
    query: &Query,
    relations: &[Relation],
    binding: usize,
    rest: &mut dyn FnMut(&mut Emitter) -> Result<()>,
) -> Result<()> {
    let filters: Vec<_> = query.filters.iter().copied().filter(|f| f.selection.binding == binding).collect();
    emit_filter_chain(emitter, query, relations, &filters, 0, rest)
}

fn emit_filter_chain(
    emitter: &mut Emitter,
    query: &Query,
    relations: &[Relation],
    filters: &[crate::query::Filter],
    idx: usize,
    rest: &mut dyn FnMut(&mut Emitter) -> Result<()>,
) -> Result<()> {
    let Some(filter) = filters.get(idx) else {
        return rest(emitter);
    };
    let relation = plan::relation_for(query, relations, filter.selection.binding);
    let row = emitter.load_binding_row(filter.selection.binding);
    let value = emitter.load_column(relation.column(filter.selection.column), row);
    let constant = emitter.builder.ins().iconst(types::I64, filter.constant as i64);
    let cc = match filter.comparison {
        Comparison::Less => cranelift_codegen::ir::condcodes::IntCC::UnsignedLessThan,
        Comparison::Greater => cranelift_codegen::ir::condcodes::IntCC::UnsignedGreaterThan,
        Comparison::Equal => cranelift_codegen::ir::condcodes::IntCC::Equal,
    };
    let passes = emitter.builder.ins().icmp(cc, value, constant);
    let then_block = emitter.builder.create_block();
    let merge_block = emitter.builder.create_block();
    emitter.builder.ins().brif(passes, then_block, &[], merge_block, &[]);
    emitter.builder.switch_to_block(then_block);
    emitter.builder.seal_block(then_block);
    emit_filter_chain(emitter, query, relations, filters, idx + 1, rest)?;
    emitter.builder.ins().jump(merge_block, &[]);
    emitter.builder.switch_to_block(merge_block);
    emitter.builder.seal_block(merge_block);
    Ok(())
}

fn emit_predicate(emitter: &mut Emitter, query: &Query, relations: &[Relation], idx: usize) -> Result<()> {
    let predicate = query.predicates[idx];
    let next = |emitter: &mut Emitter| -> Result<()> {
        if idx + 1 < query.predicates.len() {
            emit_predicate(emitter, query, relations, idx + 1)
        } else {
            emit_projection(emitter, query, relations)
        }
    };

    match plan::classify_predicate(query, relations, &predicate, idx)? {
        PredicateKind::SelfJoin => {
            let left_rel = plan::relation_for(query, relations, predicate.left.binding);
            let right_rel = plan::relation_for(query, relations, predicate.right.binding);
            let left_row = emitter.load_binding_row(predicate.left.binding);
            let left_val = emitter.load_column(left_rel.column(predicate.left.column), left_row);
            let right_row = emitter.load_binding_row(predicate.right.binding);
            let right_val = emitter.load_column(right_rel.column(predicate.right.column), right_row);
            let eq = emitter.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::Equal, left_val, right_val);
            let then_block = emitter.builder.create_block();
            let merge_block = emitter.builder.create_block();
            emitter.builder.ins().brif(eq, then_block, &[], merge_block, &[]);
            emitter.builder.switch_to_block(then_block);
            emitter.builder.seal_block(then_block);
            next(emitter)?;
            emitter.builder.ins().jump(merge_block, &[]);
            emitter.builder.switch_to_block(merge_block);
            emitter.builder.seal_block(merge_block);
            Ok(())
        }
        PredicateKind::JoinUnique { semijoin } => {
            let new_rel = plan::relation_for(query, relations, predicate.right.binding);
            let HashIndex::Unique(index) = &new_rel.index(predicate.right.column).hash else {
                return Err(EngineError::UnbuildablePipeline { binding: predicate.right.binding });
            };
            let probe_rel = plan::relation_for(query, relations, predicate.left.binding);
            let probe_row = emitter.load_binding_row(predicate.left.binding);
            let probe_val = emitter.load_column(probe_rel.column(predicate.left.column), probe_row);

            if semijoin {
                let bitset = new_rel.index(predicate.right.column).bitset.as_ref().expect("bitset always built");
                let ptr = emitter.const_ptr((bitset as *const Bitset).cast::<u8>());
                let call = emitter.builder.ins().call(emitter.bitset_fn, &[ptr, probe_val]);
                let found = emitter.builder.inst_results(call)[0];
                let zero = emitter.builder.ins().iconst(types::I8, 0);
                let found64 = emitter.builder.ins().uextend(types::I64, found);
                let zero64 = emitter.builder.ins().uextend(types::I64, zero);
                let cond = emitter.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::NotEqual, found64, zero64);
                let then_block = emitter.builder.create_block();
                let merge_block = emitter.builder.create_block();
                emitter.builder.ins().brif(cond, then_block, &[], merge_block, &[]);
                emitter.builder.switch_to_block(then_block);
                emitter.builder.seal_block(then_block);
                next(emitter)?;
                emitter.builder.ins().jump(merge_block, &[]);
                emitter.builder.switch_to_block(merge_block);
                emitter.builder.seal_block(merge_block);
            } else {
                let ptr = emitter.const_ptr((index as *const DenseUniqueIndex).cast::<u8>());
                let call = emitter.builder.ins().call(emitter.unique_fn, &[ptr, probe_val]);
                let row = emitter.builder.inst_results(call)[0];
                let absent = emitter.builder.ins().iconst(types::I64, ABSENT_ROW as i64);
                let cond = emitter.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::NotEqual, row, absent);
                let then_block = emitter.builder.create_block();
                let merge_block = emitter.builder.create_block();
                emitter.builder.ins().brif(cond, then_block, &[], merge_block, &[]);
                emitter.builder.switch_to_block(then_block);
                emitter.builder.seal_block(then_block);
                emitter.builder.def_var(emitter.row_ids[predicate.right.binding], row);
                emit_filters_then(emitter, query, relations, predicate.right.binding, &mut |e| next(e))?;
                emitter.builder.ins().jump(merge_block, &[]);
                emitter.builder.switch_to_block(merge_block);
                emitter.builder.seal_block(merge_block);
            }
            Ok(())
        }
        PredicateKind::JoinMulti => {
            let new_rel = plan::relation_for(query, relations, predicate.right.binding);
            let HashIndex::Multi(index) = &new_rel.index(predicate.right.column).hash else {
                return Err(EngineError::UnbuildablePipeline { binding: predicate.right.binding });
            };
            let probe_rel = plan::relation_for(query, relations, predicate.left.binding);
            let probe_row = emitter.load_binding_row(predicate.left.binding);
            let probe_val = emitter.load_column(probe_rel.column(predicate.left.column), probe_row);

            let ptr = emitter.const_ptr((index as *const DenseMultiIndex).cast::<u8>());
            let len_call = emitter.builder.ins().call(emitter.multi_len_fn, &[ptr, probe_val]);
            let len = emitter.builder.inst_results(len_call)[0];
            let ptr_call = emitter.builder.ins().call(emitter.multi_ptr_fn, &[ptr, probe_val]);
            let row_ids_ptr = emitter.builder.inst_results(ptr_call)[0];

            // Offset clear of the row-id/sum/amount variable indices declared
            // in `compile`, which only go up to a handful per query.
            let cursor = Variable::new(10_000 + idx);
            emitter.builder.declare_var(cursor, types::I64);
            let zero = emitter.builder.ins().iconst(types::I64, 0);
            emitter.builder.def_var(cursor, zero);

            let header = emitter.builder.create_block();
            let body = emitter.builder.create_block();
            let exit = emitter.builder.create_block();
            emitter.builder.ins().jump(header, &[]);
            emitter.builder.switch_to_block(header);
            let cursor_val = emitter.builder.use_var(cursor);
            let more = emitter.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::UnsignedLessThan, cursor_val, len);
            emitter.builder.ins().brif(more, body, &[], exit, &[]);

            emitter.builder.switch_to_block(body);
            emitter.builder.seal_block(body);
            let four = emitter.builder.ins().iconst(types::I64, 4);
            let byte_off = emitter.builder.ins().imul(cursor_val, four);
            let elem_ptr = emitter.builder.ins().iadd(row_ids_ptr, byte_off);
            let row32 = emitter.builder.ins().load(types::I32, MemFlags::trusted(), elem_ptr, 0);
            let row = emitter.builder.ins().uextend(types::I64, row32);
            emitter.builder.def_var(emitter.row_ids[predicate.right.binding], row);
            emit_filters_then(emitter, query, relations, predicate.right.binding, &mut |e| next(e))?;

            let cursor_val = emitter.builder.use_var(cursor);
            let one = emitter.builder.ins().iconst(types::I64, 1);
            let next_cursor = emitter.builder.ins().iadd(cursor_val, one);
            emitter.builder.def_var(cursor, next_cursor);
            emitter.builder.ins().jump(header, &[]);

            emitter.builder.seal_block(header);
            emitter.builder.switch_to_block(exit);
            emitter.builder.seal_block(exit);
            Ok(())
        }
    }
}

fn emit_projection(emitter: &mut Emitter, query: &Query, relations: &[Relation]) -> Result<()> {
    for (i, sel) in query.selections.iter().enumerate() {
        let relation = plan::relation_for(query, relations, sel.binding);
        let row = emitter.load_binding_row(sel.binding);
        let value = emitter.load_column(relation.column(sel.column), row);
        let current = emitter.builder.use_var(emitter.sums[i]);
        let updated = emitter.builder.ins().iadd(current, value);
        emitter.builder.def_var(emitter.sums[i], updated);
    }
    let current = emitter.builder.use_var(emitter.amount);
    let one = emitter.builder.ins().iconst(types::I64, 1);
    let updated = emitter.builder.ins().iadd(current, one);
    emitter.builder.def_var(emitter.amount, updated);
    Ok(())
}
