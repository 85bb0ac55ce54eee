//! Per-block abstract interpretation (spec.md 4.4 stages 3-6): block
//! creation, guard materialization, argument slot materialization, and the
//! stack-machine-to-SSA lowering that ties them together.
//!
//! SSA construction here does not build a dominator tree. Instead it walks
//! blocks in leader order and resolves a read lazily: a block with zero
//! statically-known predecessors gets a default (zero) value, one with
//! exactly one predecessor inherits that predecessor's value by recursing
//! into it (processing it first if needed), and one with more than one
//! predecessor always gets a phi — with a placeholder argument for any
//! predecessor not yet visited (always a loop back-edge, since forward
//! branches only ever target a later offset), patched in once that
//! predecessor finishes. This is sufficient for the reducible, structured
//! control flow emitted by every source-language compiler's loop/if/switch
//! lowering; it does not attempt to handle irreducible CFGs, matching the
//! spirit of the Forest analysis's documented "known limitation, not a bug"
//! miss (spec.md section 9).

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::ir::{
    ArgId, BlockId, ConstData, ConstKind, GuardKind, InstId, InstKind, MethodBody, PhiArg,
    UnOp, VarFlags, VarId, Value,
};
use crate::region::RegionTree;
use crate::types::member::MdArrayOp;
use crate::types::{FieldId, MethodId, StackType, TypeId, TypeStore};

use super::bytecode::{ExceptionRegion, OpCode, RawInstruction, RawOperand};
use super::error::ImportError;
use super::leaders;
use super::varflags::{self, VarAnalysis};

/// The embedder's metadata-token resolver (spec.md section 6 / bytecode.rs):
/// turns an already-decoded inline token into the field/method/type handle
/// it names. Resolving the raw token against the module's metadata tables
/// is the embedder's job; this crate only ever needs the resulting handle.
pub trait MemberResolver {
    fn resolve_field(&self, token: u32) -> FieldId;
    fn resolve_method(&self, token: u32) -> MethodId;
    fn resolve_type(&self, token: u32) -> TypeId;
}

/// Explicit configuration for [`import`], rather than ambient globals or
/// environment variables (spec.md section 6, SPEC_FULL.md section 2's
/// ambient-stack note).
pub struct ImportOptions {
    pub arg_types: Vec<TypeId>,
    pub arg_names: Vec<Option<Box<str>>>,
    pub local_types: Vec<TypeId>,
    pub local_names: Vec<Option<Box<str>>>,
    /// The method's declared return type, used to decide whether `ret`
    /// pops zero or one value off the stack.
    pub ret_ty: TypeId,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
enum SlotKey {
    Stack(usize),
    Local(u32),
}

struct PendingPatch {
    phi: InstId,
    arg_idx: usize,
    key: SlotKey,
}

struct Importer<'a> {
    body: MethodBody,
    types: &'a TypeStore,
    resolver: &'a dyn MemberResolver,
    instrs: &'a [RawInstruction],
    leaders: Vec<u32>,
    leader_start_idx: Vec<usize>,
    blocks: Vec<BlockId>,
    static_preds: Vec<Vec<usize>>,
    local_types: Vec<TypeId>,
    arg_slot: Vec<Option<VarId>>,
    local_slot: Vec<Option<VarId>>,
    ret_ty: TypeId,
    handler_seed: HashMap<usize, InstId>,
    processed: HashSet<usize>,
    in_progress: HashSet<usize>,
    out_state: HashMap<(usize, SlotKey), Value>,
    out_depth: HashMap<usize, usize>,
    pending: HashMap<usize, Vec<PendingPatch>>,
    zero_cache: HashMap<TypeId, Value>,
}

/// Run the whole six-stage pipeline (spec.md 4.4) and return the imported
/// body, or the first [`ImportError`] encountered.
pub fn import(
    instrs: &[RawInstruction],
    regions: &[ExceptionRegion],
    resolver: &dyn MemberResolver,
    opts: &ImportOptions,
    types: &TypeStore,
) -> Result<MethodBody, ImportError> {
    log::trace!("leader discovery over {} raw instructions", instrs.len());
    let leaders = leaders::find_leaders(instrs, regions)?;

    let region_tuples: Vec<_> = regions.iter().map(ExceptionRegion::as_region_tuple).collect();
    let region_tree = RegionTree::build(&region_tuples);

    log::debug!(
        "variable analysis over {} arg slot(s), {} local slot(s)",
        opts.arg_types.len(),
        opts.local_types.len()
    );
    let var_analysis = varflags::analyze_vars(
        instrs, &leaders, &region_tree, opts.arg_types.len(), opts.local_types.len(),
    );

    let mut body = MethodBody::with_regions(region_tree);
    let num_blocks = leaders.len();
    let mut blocks = Vec::with_capacity(num_blocks);
    blocks.push(body.entry_block);
    for _ in 1..num_blocks {
        blocks.push(body.create_block());
    }

    let leader_start_idx: Vec<usize> = leaders
        .iter()
        .map(|&off| {
            instrs.iter().position(|i| i.offset == off)
                .expect("leader offsets are validated by find_leaders")
        })
        .collect();

    // Stage 3 (tail): if offset 0 is reached by a back-edge, synthesize a
    // dedicated entry block so EntryBlock.NumPreds stays zero.
    if instrs.iter().any(|i| i.branch_targets().contains(&leaders[0])) {
        log::debug!("offset {:#x} is reached by a back edge; synthesizing an entry block", leaders[0]);
        let synthetic = body.create_block();
        body.append(synthetic, InstKind::Branch { cond: None, then_blk: blocks[0], else_blk: None }, types.void);
        body.add_edge(synthetic, blocks[0]);
        body.entry_block = synthetic;
    }

    // Stage 4: guard materialization.
    log::debug!("materializing {} protected region(s)", regions.len());
    let handler_seed = materialize_guards(&mut body, regions, &leaders, &blocks, types.void);

    // Stage 5: argument slot materialization.
    let arg_ids: Vec<ArgId> = opts.arg_types.iter().zip(opts.arg_names.iter())
        .map(|(&ty, name)| body.create_arg(ty, name.clone()))
        .collect();
    let mut arg_slot = vec![None; opts.arg_types.len()];
    for i in 0..opts.arg_types.len() {
        let flags = var_analysis.arg_flags[i];
        if flags.intersects(VarFlags::ADDR_TAKEN | VarFlags::STORED) {
            let name = opts.arg_names[i].as_ref().map(|n| format!("a_{n}").into_boxed_str());
            let var = body.create_var(opts.arg_types[i], name);
            body.var_mut(var).flags = flags;
            body.var_mut(var).is_exposed = flags.contains(VarFlags::ADDR_TAKEN);
            arg_slot[i] = Some(var);
        }
    }
    for (i, slot) in arg_slot.iter().enumerate() {
        if let Some(var) = slot {
            let entry = body.entry_block;
            let kind = InstKind::StoreVar { var: Value::Variable(*var), value: Value::Argument(arg_ids[i]) };
            append_front_of_entry(&mut body, entry, kind, types.void);
        }
    }

    // Exposed-local slot materialization (symmetric to stage 5, for the
    // locals that spec.md 4.4 stage 2 already marks IsExposed).
    let mut local_slot = vec![None; opts.local_types.len()];
    for i in 0..opts.local_types.len() {
        let flags = var_analysis.local_flags[i];
        if flags.intersects(VarFlags::ADDR_TAKEN | VarFlags::CROSSES_REGIONS) {
            let var = body.create_var(opts.local_types[i], opts.local_names[i].clone());
            body.var_mut(var).flags = flags;
            body.var_mut(var).is_exposed = true;
            local_slot[i] = Some(var);
        }
    }

    let mut static_preds = vec![Vec::new(); num_blocks];
    for b in 0..num_blocks {
        let slice = block_slice(instrs, &leader_start_idx, b);
        for t in block_targets(slice, b, num_blocks, &leaders) {
            static_preds[t].push(b);
        }
    }

    let mut importer = Importer {
        body,
        types,
        resolver,
        instrs,
        leaders,
        leader_start_idx,
        blocks,
        static_preds,
        local_types: opts.local_types.clone(),
        arg_slot,
        local_slot,
        ret_ty: opts.ret_ty,
        handler_seed,
        processed: HashSet::new(),
        in_progress: HashSet::new(),
        out_state: HashMap::new(),
        out_depth: HashMap::new(),
        pending: HashMap::new(),
        zero_cache: HashMap::new(),
    };

    for b in 0..num_blocks {
        importer.ensure_processed(b)?;
    }
    debug_assert!(importer.pending.is_empty(), "every predecessor is visited by the top-level drive loop");

    let mut body = importer.body;
    split_shared_guard_blocks(&mut body, types.void);
    Ok(body)
}

fn append_front_of_entry(body: &mut MethodBody, entry: BlockId, kind: InstKind, ty: TypeId) -> InstId {
    match body.block(entry).last() {
        Some(last) if body.inst(last).kind.is_terminator() => body.insert_before(last, kind, ty),
        _ => body.append(entry, kind, ty),
    }
}

fn block_slice<'a>(instrs: &'a [RawInstruction], leader_start_idx: &[usize], block: usize) -> &'a [RawInstruction] {
    let start = leader_start_idx[block];
    let end = leader_start_idx.get(block + 1).copied().unwrap_or(instrs.len());
    &instrs[start..end]
}

/// Every block this block's terminator can transfer control to (branch
/// targets plus, for conditional/fallthrough-capable opcodes, the next
/// block), computed purely from the static bytecode shape — used both to
/// seed [`Importer::static_preds`] and, during interpretation, to build the
/// actual [`InstKind::Branch`].
fn block_targets(slice: &[RawInstruction], block_idx: usize, num_blocks: usize, leaders: &[u32]) -> Vec<usize> {
    let block_idx_of = |offset: u32| leaders.partition_point(|&l| l <= offset) - 1;
    let Some(last) = slice.last() else { return Vec::new() };
    let fallthrough = if block_idx + 1 < num_blocks { Some(block_idx + 1) } else { None };
    match last.op {
        OpCode::Br => last.branch_targets().iter().map(|&t| block_idx_of(t)).collect(),
        OpCode::BrTrue | OpCode::BrFalse | OpCode::Switch => {
            let mut v: Vec<usize> = last.branch_targets().iter().map(|&t| block_idx_of(t)).collect();
            v.extend(fallthrough);
            v
        }
        OpCode::Ret | OpCode::Throw => Vec::new(),
        _ => fallthrough.into_iter().collect(),
    }
}

/// Stage 4: insert a `GuardInst` into each protected region's try-entry
/// block, in input (inner-first) order. Two regions sharing a `try_start`
/// but not a `try_end` are properly nested (not sibling catch clauses of
/// the same try) and both land in the same block as separate `Guard`
/// headers, innermost first; [`split_shared_guard_blocks`] peels them
/// apart after stage 6 builds the real CFG, so the block's actual
/// predecessors — not a guess from the raw bytecode — are the ones
/// redirected (spec.md 4.4 stage 4).
fn materialize_guards(
    body: &mut MethodBody,
    regions: &[ExceptionRegion],
    leaders: &[u32],
    blocks: &[BlockId],
    void_ty: TypeId,
) -> HashMap<usize, InstId> {
    let block_idx_of = |offset: u32| leaders.partition_point(|&l| l <= offset) - 1;
    let mut seed: HashMap<usize, InstId> = HashMap::new();

    for region in regions {
        let try_entry = blocks[block_idx_of(region.try_start)];
        let guard_kind = match region.kind {
            crate::region::RegionKind::Catch | crate::region::RegionKind::Filter => GuardKind::Catch,
            crate::region::RegionKind::Finally => GuardKind::Finally,
            crate::region::RegionKind::Fault => GuardKind::Fault,
        };
        let handler_block = blocks[block_idx_of(region.handler_start)];
        let filter_block = region.filter_start.map(|o| blocks[block_idx_of(o)]);
        let guard_id = body.append(
            try_entry,
            InstKind::Guard { kind: guard_kind, handler: handler_block, filter: filter_block, catch_type: region.catch_type },
            void_ty,
        );

        seed.insert(block_idx_of(region.handler_start), guard_id);
        if let Some(fo) = region.filter_start {
            seed.insert(block_idx_of(fo), guard_id);
        }
    }
    seed
}

/// Stage 4 (continued): peel apart any block `materialize_guards` left
/// with more than one `Guard` header — one per protected region sharing
/// that block's `try_start` — once stage 6's interpretation has built the
/// real CFG. Every guard but the innermost (the first, kept on the
/// original block) moves into its own fresh block, hoisted above the
/// block it came from and wired to fall through into it, redirecting the
/// real predecessors found there so the outer guard stays reachable
/// (spec.md 4.4 stage 4: "a fresh dominating block that falls through
/// into the inner one's").
fn split_shared_guard_blocks(body: &mut MethodBody, void_ty: TypeId) {
    let block_ids: Vec<BlockId> = body.blocks().map(|(id, _)| id).collect();
    for block in block_ids {
        let extra_guards: Vec<InstId> = body
            .block_insts(block)
            .take_while(|&i| body.inst(i).kind.is_header())
            .filter(|&i| body.inst(i).kind.is_guard())
            .skip(1)
            .collect();

        let mut current = block;
        for guard in extra_guards {
            let head = body.hoist_predecessors(current);
            body.move_range(guard, guard, head);
            body.append(head, InstKind::Branch { cond: None, then_blk: current, else_blk: None }, void_ty);
            body.add_edge(head, current);
            current = head;
        }
    }
}

impl<'a> Importer<'a> {
    fn value_type(&self, v: Value) -> TypeId {
        match v {
            Value::Const(c) => self.body.konst(c).ty,
            Value::Argument(a) => self.body.arg(a).ty,
            Value::Variable(v) => self.body.var(v).ty,
            Value::Instruction(i) => self.body.inst(i).result_ty,
        }
    }

    fn zero_const(&mut self, ty: TypeId) -> Value {
        if let Some(&v) = self.zero_cache.get(&ty) { return v; }
        let kind = match self.types.lookup(ty).stack_type() {
            StackType::Float => ConstKind::Float(0),
            StackType::Object | StackType::ByRef | StackType::Struct => ConstKind::Null,
            StackType::Int32 | StackType::Int64 | StackType::NInt | StackType::Void => ConstKind::Int(0),
        };
        let id = self.body.create_const(ConstData { kind, ty });
        let v = Value::Const(id);
        self.zero_cache.insert(ty, v);
        v
    }

    fn default_value(&mut self, key: SlotKey) -> Value {
        match key {
            SlotKey::Local(slot) => { let ty = self.local_types[slot as usize]; self.zero_const(ty) }
            SlotKey::Stack(_) => unreachable!("a block with no predecessors has zero stack depth"),
        }
    }

    fn key_ty(&self, key: SlotKey, sample: Value) -> TypeId {
        match key {
            SlotKey::Local(slot) => self.local_types[slot as usize],
            SlotKey::Stack(_) => self.value_type(sample),
        }
    }

    fn ensure_processed(&mut self, block: usize) -> Result<(), ImportError> {
        if self.processed.contains(&block) { return Ok(()); }
        if !self.in_progress.insert(block) {
            // A cycle through single-predecessor blocks with no intervening
            // merge point — not a shape any structured source-language
            // lowering produces (see DESIGN.md); leave it unprocessed so
            // callers higher up fall back to defaults rather than looping.
            return Ok(());
        }
        self.process_block(block)?;
        self.in_progress.remove(&block);
        self.processed.insert(block);
        if let Some(list) = self.pending.remove(&block) {
            for p in list {
                let v = self.out_value(block, p.key)?;
                self.body.set_operand(p.phi, p.arg_idx, v);
            }
        }
        Ok(())
    }

    fn out_value(&mut self, block: usize, key: SlotKey) -> Result<Value, ImportError> {
        self.ensure_processed(block)?;
        if let Some(&v) = self.out_state.get(&(block, key)) { return Ok(v); }
        self.in_value(block, key)
    }

    fn in_value(&mut self, block: usize, key: SlotKey) -> Result<Value, ImportError> {
        if key == SlotKey::Stack(0) {
            if let Some(&g) = self.handler_seed.get(&block) {
                return Ok(Value::Instruction(g));
            }
        }
        let preds = self.static_preds[block].clone();
        match preds.len() {
            0 => Ok(self.default_value(key)),
            1 => self.out_value(preds[0], key),
            _ => self.merge_value(block, &preds, key),
        }
    }

    fn merge_value(&mut self, block: usize, preds: &[usize], key: SlotKey) -> Result<Value, ImportError> {
        let mut vals: Vec<Option<Value>> = Vec::with_capacity(preds.len());
        for &p in preds {
            if self.processed.contains(&p) {
                vals.push(Some(*self.out_state.get(&(p, key))
                    .unwrap_or(&self.in_value_cached_unreachable())));
            } else {
                vals.push(None);
            }
        }
        // Re-fetch any entries that hit the sentinel above via the real
        // (possibly-recursive) path, since `unwrap_or` above cannot borrow
        // `self` mutably; see `in_value_cached_unreachable`'s doc comment.
        for (i, &p) in preds.iter().enumerate() {
            if self.processed.contains(&p) && !self.out_state.contains_key(&(p, key)) {
                vals[i] = Some(self.in_value(p, key)?);
            }
        }

        let sample = vals.iter().flatten().next().copied()
            .expect("at least one forward predecessor is already processed by the top-level drive order");
        let all_known = vals.iter().all(Option::is_some);
        if all_known && vals.iter().all(|v| *v == Some(sample)) {
            return Ok(sample);
        }

        let ty = self.key_ty(key, sample);
        let block_id = self.blocks[block];
        let mut args: SmallVec<[PhiArg; 4]> = SmallVec::new();
        for (i, &p) in preds.iter().enumerate() {
            let v = vals[i].unwrap_or_else(|| self.zero_const(ty));
            args.push(PhiArg { pred: self.blocks[p], value: v });
        }
        let phi = self.body.append(block_id, InstKind::Phi { args }, ty);
        for (i, &p) in preds.iter().enumerate() {
            if vals[i].is_none() {
                self.pending.entry(p).or_default().push(PendingPatch { phi, arg_idx: i, key });
            }
        }
        Ok(Value::Instruction(phi))
    }

    /// Placeholder never actually read: `out_state` is always populated
    /// for a processed block's touched keys, and untouched keys fall
    /// through to `in_value` in the loop right below this lookup.
    fn in_value_cached_unreachable(&self) -> Value {
        Value::Const(crate::ir::ConstId(u32::MAX))
    }

    fn entry_stack(&mut self, block: usize) -> Result<Vec<Value>, ImportError> {
        if let Some(&g) = self.handler_seed.get(&block) {
            return Ok(vec![Value::Instruction(g)]);
        }
        let preds = self.static_preds[block].clone();
        let depth = match preds.len() {
            0 => 0,
            1 => { self.ensure_processed(preds[0])?; *self.out_depth.get(&preds[0]).unwrap_or(&0) }
            _ => {
                let known: Vec<usize> = preds.iter().filter_map(|p| self.out_depth.get(p).copied()).collect();
                match known.first() {
                    Some(&first) if known.iter().all(|&d| d == first) => first,
                    Some(_) => {
                        let offset = self.leaders[block];
                        return Err(ImportError::stack_mismatch(offset, "predecessors disagree on stack depth at merge point"));
                    }
                    None => 0,
                }
            }
        };
        (0..depth).map(|i| self.in_value(block, SlotKey::Stack(i))).collect()
    }

    fn process_block(&mut self, block: usize) -> Result<(), ImportError> {
        let block_id = self.blocks[block];
        let mut stack = self.entry_stack(block)?;
        let mut locals: HashMap<u32, Value> = HashMap::new();
        let slice = block_slice(self.instrs, &self.leader_start_idx, block);
        let mut terminated = false;
        for raw in slice {
            terminated = self.interpret(block, block_id, raw, &mut stack, &mut locals)?;
        }
        if !terminated {
            if let Some(&next_id) = self.blocks.get(block + 1) {
                self.body.append(block_id, InstKind::Branch { cond: None, then_blk: next_id, else_blk: None }, self.types.void);
                self.body.add_edge(block_id, next_id);
            }
        }
        self.out_depth.insert(block, stack.len());
        for (i, v) in stack.into_iter().enumerate() {
            self.out_state.insert((block, SlotKey::Stack(i)), v);
        }
        for (slot, v) in locals {
            self.out_state.insert((block, SlotKey::Local(slot)), v);
        }
        Ok(())
    }

    fn read_local(&mut self, block: usize, locals: &mut HashMap<u32, Value>, slot: u32) -> Result<Value, ImportError> {
        if let Some(&v) = locals.get(&slot) { return Ok(v); }
        let v = self.in_value(block, SlotKey::Local(slot))?;
        locals.insert(slot, v);
        Ok(v)
    }

    #[allow(clippy::too_many_lines)]
    fn interpret(
        &mut self,
        block: usize,
        block_id: BlockId,
        raw: &RawInstruction,
        stack: &mut Vec<Value>,
        locals: &mut HashMap<u32, Value>,
    ) -> Result<bool, ImportError> {
        let off = raw.offset;
        macro_rules! pop {
            () => {
                stack.pop().ok_or_else(|| ImportError::invalid_input(off, "stack underflow"))?
            };
        }
        macro_rules! push_inst {
            ($kind:expr, $ty:expr) => {{
                let id = self.body.append(block_id, $kind, $ty);
                stack.push(Value::Instruction(id));
            }};
        }

        match raw.op {
            OpCode::Nop => {}
            OpCode::Dup => { let v = *stack.last().ok_or_else(|| ImportError::invalid_input(off, "dup on empty stack"))?; stack.push(v); }
            OpCode::Pop => { pop!(); }

            OpCode::LdcI4 => {
                let RawOperand::Int(n) = raw.operand else { return Err(ImportError::invalid_input(off, "ldc.i4 missing operand")) };
                let id = self.body.create_const(ConstData { kind: ConstKind::Int(n), ty: self.types.i32_ });
                stack.push(Value::Const(id));
            }
            OpCode::LdcI8 => {
                let RawOperand::Int(n) = raw.operand else { return Err(ImportError::invalid_input(off, "ldc.i8 missing operand")) };
                let id = self.body.create_const(ConstData { kind: ConstKind::Int(n), ty: self.types.i64_ });
                stack.push(Value::Const(id));
            }
            OpCode::LdcR4 => {
                let RawOperand::Int(bits) = raw.operand else { return Err(ImportError::invalid_input(off, "ldc.r4 missing operand")) };
                let id = self.body.create_const(ConstData { kind: ConstKind::Float(bits as u64), ty: self.types.f32_ });
                stack.push(Value::Const(id));
            }
            OpCode::LdcR8 => {
                let RawOperand::Int(bits) = raw.operand else { return Err(ImportError::invalid_input(off, "ldc.r8 missing operand")) };
                let id = self.body.create_const(ConstData { kind: ConstKind::Float(bits as u64), ty: self.types.f64_ });
                stack.push(Value::Const(id));
            }
            OpCode::LdNull => {
                let id = self.body.create_const(ConstData { kind: ConstKind::Null, ty: self.types.object });
                stack.push(Value::Const(id));
            }

            OpCode::Ldarg => {
                let RawOperand::Var(i) = raw.operand else { return Err(ImportError::invalid_input(off, "ldarg missing slot")) };
                let i = i as usize;
                let v = match self.arg_slot[i] {
                    Some(var) => { push_inst!(InstKind::LoadVar { var: Value::Variable(var), ty: self.body.var(var).ty }, self.body.var(var).ty); return Ok(false); }
                    None => Value::Argument(crate::ir::value::ArgId(i as u32)),
                };
                stack.push(v);
            }
            OpCode::Starg => {
                let RawOperand::Var(i) = raw.operand else { return Err(ImportError::invalid_input(off, "starg missing slot")) };
                let var = self.arg_slot[i as usize].expect("a stored argument is always materialized in stage 5");
                let value = pop!();
                self.body.append(block_id, InstKind::StoreVar { var: Value::Variable(var), value }, self.types.void);
            }
            OpCode::Ldarga => {
                let RawOperand::Var(i) = raw.operand else { return Err(ImportError::invalid_input(off, "ldarga missing slot")) };
                let var = self.arg_slot[i as usize].expect("an address-taken argument is always materialized in stage 5");
                stack.push(Value::Variable(var));
            }
            OpCode::Ldloc => {
                let RawOperand::Var(i) = raw.operand else { return Err(ImportError::invalid_input(off, "ldloc missing slot")) };
                let v = match self.local_slot[i as usize] {
                    Some(var) => { let ty = self.body.var(var).ty; push_inst!(InstKind::LoadVar { var: Value::Variable(var), ty }, ty); return Ok(false); }
                    None => self.read_local(block, locals, i as u32)?,
                };
                stack.push(v);
            }
            OpCode::Stloc => {
                let RawOperand::Var(i) = raw.operand else { return Err(ImportError::invalid_input(off, "stloc missing slot")) };
                let value = pop!();
                match self.local_slot[i as usize] {
                    Some(var) => { self.body.append(block_id, InstKind::StoreVar { var: Value::Variable(var), value }, self.types.void); }
                    None => { locals.insert(i as u32, value); }
                }
            }
            OpCode::Ldloca => {
                let RawOperand::Var(i) = raw.operand else { return Err(ImportError::invalid_input(off, "ldloca missing slot")) };
                let var = self.local_slot[i as usize].expect("an address-taken local is always materialized");
                stack.push(Value::Variable(var));
            }

            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::DivUn
            | OpCode::Rem | OpCode::RemUn | OpCode::And | OpCode::Or | OpCode::Xor
            | OpCode::Shl | OpCode::Shr | OpCode::ShrUn => {
                use crate::ir::BinOp::*;
                let op = match raw.op {
                    OpCode::Add => Add, OpCode::Sub => Sub, OpCode::Mul => Mul,
                    OpCode::Div | OpCode::DivUn => Div,
                    OpCode::Rem | OpCode::RemUn => Rem,
                    OpCode::And => And, OpCode::Or => Or, OpCode::Xor => Xor,
                    OpCode::Shl => Shl, OpCode::Shr => Shr, OpCode::ShrUn => ShrUn,
                    _ => unreachable!(),
                };
                let right = pop!();
                let left = pop!();
                let ty = self.value_type(left);
                push_inst!(InstKind::Binary { op, left, right }, ty);
            }
            OpCode::Neg => { let v = pop!(); let ty = self.value_type(v); push_inst!(InstKind::Unary { op: UnOp::Neg, operand: v }, ty); }
            OpCode::Not => { let v = pop!(); let ty = self.value_type(v); push_inst!(InstKind::Unary { op: UnOp::Not, operand: v }, ty); }
            OpCode::Conv => {
                let RawOperand::Token(tok) = raw.operand else { return Err(ImportError::invalid_input(off, "conv missing target type")) };
                let target = self.resolver.resolve_type(tok);
                let v = pop!();
                push_inst!(InstKind::Unary { op: UnOp::Conv(target), operand: v }, target);
            }

            OpCode::Ceq | OpCode::Cgt | OpCode::CgtUn | OpCode::Clt | OpCode::CltUn => {
                use crate::ir::CmpOp::*;
                let op = match raw.op {
                    OpCode::Ceq => Eq, OpCode::Cgt => Gt, OpCode::CgtUn => GtUn,
                    OpCode::Clt => Lt, OpCode::CltUn => LtUn, _ => unreachable!(),
                };
                let right = pop!();
                let left = pop!();
                push_inst!(InstKind::Compare { op, left, right }, self.types.bool_);
            }

            OpCode::Br => {
                let targets = block_targets(&[raw.clone()], block, self.blocks.len(), &self.leaders);
                let then_idx = targets[0];
                let then_blk = self.blocks[then_idx];
                self.body.append(block_id, InstKind::Branch { cond: None, then_blk, else_blk: None }, self.types.void);
                self.body.add_edge(block_id, then_blk);
                return Ok(true);
            }
            OpCode::BrTrue | OpCode::BrFalse => {
                let RawOperand::BranchTarget(t) = raw.operand else { return Err(ImportError::invalid_input(off, "conditional branch missing target")) };
                let target_idx = self.leaders.partition_point(|&l| l <= t) - 1;
                let Some(fallthrough_idx) = self.blocks.get(block + 1).map(|_| block + 1) else {
                    return Err(ImportError::invalid_input(off, "conditional branch has no fallthrough block"));
                };
                let cond = pop!();
                let (then_idx, else_idx) = if raw.op == OpCode::BrTrue { (target_idx, fallthrough_idx) } else { (fallthrough_idx, target_idx) };
                let then_blk = self.blocks[then_idx];
                let else_blk = self.blocks[else_idx];
                self.body.append(block_id, InstKind::Branch { cond: Some(cond), then_blk, else_blk: Some(else_blk) }, self.types.void);
                self.body.add_edge(block_id, then_blk);
                self.body.add_edge(block_id, else_blk);
                return Ok(true);
            }
            OpCode::Switch => {
                return Err(ImportError::unsupported(off, "multi-way switch has no direct IR representation"));
            }

            OpCode::Call => {
                let RawOperand::Token(tok) = raw.operand else { return Err(ImportError::invalid_input(off, "call missing method token")) };
                let method = self.resolver.resolve_method(tok);
                let sig = self.types.method(method).signature.clone();
                let is_static = self.types.method(method).is_static;
                let mut args: SmallVec<[Value; 4]> = SmallVec::new();
                for _ in 0..sig.params.len() { args.push(Value::Const(crate::ir::ConstId(0))); }
                for i in (0..sig.params.len()).rev() { args[i] = pop!(); }
                if !is_static {
                    let this = pop!();
                    args.insert(0, this);
                }
                if sig.ret == self.types.void {
                    self.body.append(block_id, InstKind::Call { method, args }, self.types.void);
                } else {
                    push_inst!(InstKind::Call { method, args }, sig.ret);
                }
            }
            OpCode::Ret => {
                let mut values = SmallVec::new();
                if self.ret_ty != self.types.void { values.push(pop!()); }
                self.body.append(block_id, InstKind::Return { values }, self.types.void);
                return Ok(true);
            }
            OpCode::Throw => {
                let value = pop!();
                self.body.append(block_id, InstKind::Throw { value }, self.types.void);
                return Ok(true);
            }

            OpCode::Ldfld => {
                let RawOperand::Token(tok) = raw.operand else { return Err(ImportError::invalid_input(off, "ldfld missing field token")) };
                let field = self.resolver.resolve_field(tok);
                let field_ty = self.types.field(field).ty;
                let base = pop!();
                if self.types.lookup(self.value_type(base)).stack_type() == StackType::Struct {
                    push_inst!(InstKind::ExtractField { base, field }, field_ty);
                } else {
                    let addr = self.body.append(block_id, InstKind::FieldAddr { base, field }, field_ty);
                    push_inst!(InstKind::Load { addr: Value::Instruction(addr), ty: field_ty }, field_ty);
                }
            }
            OpCode::Stfld => {
                let RawOperand::Token(tok) = raw.operand else { return Err(ImportError::invalid_input(off, "stfld missing field token")) };
                let field = self.resolver.resolve_field(tok);
                let field_ty = self.types.field(field).ty;
                let value = pop!();
                let base = pop!();
                let addr = self.body.append(block_id, InstKind::FieldAddr { base, field }, field_ty);
                self.body.append(block_id, InstKind::Store { addr: Value::Instruction(addr), value }, self.types.void);
            }
            OpCode::Ldflda => {
                let RawOperand::Token(tok) = raw.operand else { return Err(ImportError::invalid_input(off, "ldflda missing field token")) };
                let field = self.resolver.resolve_field(tok);
                let field_ty = self.types.field(field).ty;
                let base = pop!();
                push_inst!(InstKind::FieldAddr { base, field }, field_ty);
            }

            OpCode::Ldlen => {
                let array = pop!();
                push_inst!(InstKind::Intrinsic { op: crate::ir::CilIntrinsic::ArrayLen, args: smallvec::smallvec![array] }, self.types.i32_);
            }
            OpCode::Ldelem => {
                let RawOperand::Token(tok) = raw.operand else { return Err(ImportError::invalid_input(off, "ldelem missing element type")) };
                let elem_ty = self.resolver.resolve_type(tok);
                let index = pop!();
                let array = pop!();
                let addr = self.body.append(block_id, InstKind::ArrayAddr { array, index, elem_ty }, elem_ty);
                push_inst!(InstKind::Load { addr: Value::Instruction(addr), ty: elem_ty }, elem_ty);
            }
            OpCode::Stelem => {
                let RawOperand::Token(tok) = raw.operand else { return Err(ImportError::invalid_input(off, "stelem missing element type")) };
                let elem_ty = self.resolver.resolve_type(tok);
                let value = pop!();
                let index = pop!();
                let array = pop!();
                let addr = self.body.append(block_id, InstKind::ArrayAddr { array, index, elem_ty }, elem_ty);
                self.body.append(block_id, InstKind::Store { addr: Value::Instruction(addr), value }, self.types.void);
            }
            OpCode::Ldelema => {
                let RawOperand::Token(tok) = raw.operand else { return Err(ImportError::invalid_input(off, "ldelema missing element type")) };
                let elem_ty = self.resolver.resolve_type(tok);
                let index = pop!();
                let array = pop!();
                push_inst!(InstKind::ArrayAddr { array, index, elem_ty }, elem_ty);
            }

            OpCode::Unsupported => {
                return Err(ImportError::unsupported(off, "construct requires full metadata resolution (newarr/newobj/box/unbox)"));
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::member::{FieldData, MethodData, Signature, TypeDefData};
    use crate::types::Kind;

    struct FakeResolver;
    impl MemberResolver for FakeResolver {
        fn resolve_field(&self, _token: u32) -> FieldId { panic!("no field tokens in these tests") }
        fn resolve_method(&self, _token: u32) -> MethodId { panic!("no method tokens in these tests") }
        fn resolve_type(&self, _token: u32) -> TypeId { panic!("no type tokens in these tests") }
    }

    fn opts(types: &TypeStore) -> ImportOptions {
        ImportOptions { arg_types: vec![], arg_names: vec![], local_types: vec![], local_names: vec![], ret_ty: types.i32_ }
    }

    #[test]
    fn straight_line_add_and_return() {
        let types = TypeStore::new();
        let instrs = vec![
            RawInstruction::new(OpCode::LdcI4, 0, RawOperand::Int(1)),
            RawInstruction::new(OpCode::LdcI4, 1, RawOperand::Int(2)),
            RawInstruction::new(OpCode::Add, 2, RawOperand::None),
            RawInstruction::new(OpCode::Ret, 3, RawOperand::None),
        ];
        let body = import(&instrs, &[], &FakeResolver, &opts(&types), &types).unwrap();
        assert_eq!(body.num_blocks(), 1);
        assert_eq!(body.block(body.entry_block).num_preds(), 0);
        let last = body.block_insts(body.entry_block).last().unwrap();
        assert!(matches!(body.inst(last).kind, InstKind::Return { .. }));
    }

    #[test]
    fn conditional_branch_produces_two_successors() {
        let types = TypeStore::new();
        let instrs = vec![
            RawInstruction::new(OpCode::LdcI4, 0, RawOperand::Int(1)),
            RawInstruction::new(OpCode::BrTrue, 1, RawOperand::BranchTarget(10)),
            RawInstruction::new(OpCode::LdcI4, 2, RawOperand::Int(2)),
            RawInstruction::new(OpCode::Ret, 3, RawOperand::None),
            RawInstruction::new(OpCode::LdcI4, 10, RawOperand::Int(3)),
            RawInstruction::new(OpCode::Ret, 11, RawOperand::None),
        ];
        let body = import(&instrs, &[], &FakeResolver, &opts(&types), &types).unwrap();
        assert_eq!(body.num_blocks(), 3);
        assert_eq!(body.block(body.entry_block).num_succs(), 2);
    }

    #[test]
    fn loop_back_edge_merges_via_a_phi() {
        let types = TypeStore::new();
        // loc0 = 0; while (loc0) { loc0 = loc0 } ; ret loc0
        let instrs = vec![
            RawInstruction::new(OpCode::LdcI4, 0, RawOperand::Int(0)),
            RawInstruction::new(OpCode::Stloc, 1, RawOperand::Var(0)),
            RawInstruction::new(OpCode::Ldloc, 2, RawOperand::Var(0)),
            RawInstruction::new(OpCode::BrFalse, 3, RawOperand::BranchTarget(20)),
            RawInstruction::new(OpCode::Ldloc, 4, RawOperand::Var(0)),
            RawInstruction::new(OpCode::Stloc, 5, RawOperand::Var(0)),
            RawInstruction::new(OpCode::Br, 6, RawOperand::BranchTarget(2)),
            RawInstruction::new(OpCode::Ldloc, 20, RawOperand::Var(0)),
            RawInstruction::new(OpCode::Ret, 21, RawOperand::None),
        ];
        let mut o = opts(&types);
        o.local_types = vec![types.i32_];
        o.local_names = vec![None];
        let body = import(&instrs, &[], &FakeResolver, &o, &types).unwrap();
        // The loop header block (offset 2) has two predecessors and must
        // carry a phi merging the pre-header value with the latch value.
        let header = body.blocks().find(|(_, b)| b.num_preds() == 2).expect("loop header has 2 preds");
        let has_phi = body.block_insts(header.0).any(|i| body.inst(i).kind.is_phi());
        assert!(has_phi);
    }

    #[test]
    fn exception_handler_entry_sees_the_guard_on_its_stack() {
        let mut types = TypeStore::new();
        let def = types.define_type(TypeDefData { name: Some("Exn".into()), kind: Kind::Reference });
        let exn_ty = types.intern(crate::types::TypeKind::Def(def));
        let instrs = vec![
            RawInstruction::new(OpCode::Nop, 0, RawOperand::None),
            RawInstruction::new(OpCode::Ret, 1, RawOperand::None),
            RawInstruction::new(OpCode::Pop, 4, RawOperand::None),
            RawInstruction::new(OpCode::Ret, 5, RawOperand::None),
        ];
        let regions = vec![ExceptionRegion {
            kind: crate::region::RegionKind::Catch,
            try_start: 0, try_end: 4, handler_start: 4, handler_end: 6,
            filter_start: None, catch_type: Some(exn_ty),
        }];
        let mut o = opts(&types);
        o.ret_ty = types.void;
        let body = import(&instrs, &regions, &FakeResolver, &o, &types).unwrap();
        let try_entry = body.entry_block;
        assert!(body.block_insts(try_entry).any(|i| body.inst(i).kind.is_guard()));
    }

    #[test]
    fn nested_try_sharing_a_try_start_keeps_both_guards_reachable() {
        let mut types = TypeStore::new();
        let def = types.define_type(TypeDefData { name: Some("Exn".into()), kind: Kind::Reference });
        let exn_ty = types.intern(crate::types::TypeKind::Def(def));
        let instrs = vec![
            RawInstruction::new(OpCode::Nop, 0, RawOperand::None),
            RawInstruction::new(OpCode::Ret, 1, RawOperand::None),
            RawInstruction::new(OpCode::Pop, 4, RawOperand::None),
            RawInstruction::new(OpCode::Ret, 5, RawOperand::None),
        ];
        // Inner catch and outer finally both protect offset 0, so they
        // share a try_start but disagree on try_end: a properly nested
        // try, not two sibling handlers of the same try.
        let regions = vec![
            ExceptionRegion {
                kind: crate::region::RegionKind::Catch,
                try_start: 0, try_end: 1, handler_start: 4, handler_end: 5,
                filter_start: None, catch_type: Some(exn_ty),
            },
            ExceptionRegion {
                kind: crate::region::RegionKind::Finally,
                try_start: 0, try_end: 2, handler_start: 5, handler_end: 6,
                filter_start: None, catch_type: None,
            },
        ];
        let mut o = opts(&types);
        o.ret_ty = types.void;
        let body = import(&instrs, &regions, &FakeResolver, &o, &types).unwrap();

        assert_eq!(body.num_blocks(), 4, "try body, both handlers, and the hoisted outer-guard block");
        let new_entry = body.entry_block;
        assert!(
            body.block_insts(new_entry).any(|i| matches!(body.inst(i).kind, InstKind::Guard { kind: GuardKind::Finally, .. })),
            "the outer guard heads its own reachable block instead of being orphaned"
        );
        assert_eq!(body.block(new_entry).num_succs(), 1);
        let inner_block = body.block(new_entry).succs[0];
        assert_eq!(body.block(inner_block).num_preds(), 1, "the split block falls through into the original try entry");
        assert!(body.block_insts(inner_block).any(|i| matches!(body.inst(i).kind, InstKind::Guard { kind: GuardKind::Catch, .. })));
    }

    #[test]
    fn field_access_on_a_reference_base_loads_through_an_address() {
        let mut types = TypeStore::new();
        let owner = types.define_type(TypeDefData { name: Some("Point".into()), kind: Kind::Reference });
        let field = types.define_field(FieldData { name: Some("x".into()), owner: Some(owner), ty: types.i32_, is_static: false });
        let obj_ty = types.intern(crate::types::TypeKind::Def(owner));

        struct FieldResolver(FieldId);
        impl MemberResolver for FieldResolver {
            fn resolve_field(&self, _t: u32) -> FieldId { self.0 }
            fn resolve_method(&self, _t: u32) -> MethodId { panic!() }
            fn resolve_type(&self, _t: u32) -> TypeId { panic!() }
        }
        let resolver = FieldResolver(field);

        let mut o = ImportOptions {
            arg_types: vec![obj_ty], arg_names: vec![None],
            local_types: vec![], local_names: vec![], ret_ty: types.i32_,
        };
        o.ret_ty = types.i32_;
        let instrs = vec![
            RawInstruction::new(OpCode::Ldarg, 0, RawOperand::Var(0)),
            RawInstruction::new(OpCode::Ldfld, 1, RawOperand::Token(0)),
            RawInstruction::new(OpCode::Ret, 2, RawOperand::None),
        ];
        let body = import(&instrs, &[], &resolver, &o, &types).unwrap();
        let kinds: Vec<_> = body.block_insts(body.entry_block).map(|i| body.inst(i).kind.clone()).collect();
        assert!(kinds.iter().any(|k| matches!(k, InstKind::FieldAddr { .. })));
        assert!(kinds.iter().any(|k| matches!(k, InstKind::Load { .. })));
    }
}
