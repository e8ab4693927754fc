use crate::{
    Isolate, ObjectId, ObjectResult, PcDescriptorKind, PcDescriptors, Space, TokenPosition,
    Visitable, Visitor, WORD_SIZE, align_up,
};

/// Filler for unused instruction bytes, traps when executed.
pub const BREAK_INSTRUCTION: u8 = 0xCC;

/// Generated machine code and the metadata to interpret its pcs.
pub struct Code {
    instructions: Box<[u8]>,
    is_optimized: bool,
    is_alive: bool,
    pub owner: Option<ObjectId>,
    pub object_pool: Option<ObjectId>,
    pub pc_descriptors: Option<ObjectId>,
    pub exception_handlers: Option<ObjectId>,
    pub local_variables: Option<ObjectId>,
}

impl Code {
    /// Copies `bytes`, the tail up to the next word is filled with break
    /// instructions.
    pub fn new(bytes: &[u8], is_optimized: bool) -> Self {
        let mut instructions = vec![BREAK_INSTRUCTION; align_up(bytes.len().max(1), WORD_SIZE)];
        instructions[..bytes.len()].copy_from_slice(bytes);
        Self {
            instructions: instructions.into_boxed_slice(),
            is_optimized,
            is_alive: true,
            owner: None,
            object_pool: None,
            pc_descriptors: None,
            exception_handlers: None,
            local_variables: None,
        }
    }

    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    pub fn size(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_optimized(&self) -> bool {
        self.is_optimized
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    pub fn contains_pc_offset(&self, pc_offset: usize) -> bool {
        pc_offset < self.instructions.len()
    }
}

impl Visitable for Code {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_opt(self.owner);
        visitor.visit_opt(self.object_pool);
        visitor.visit_opt(self.pc_descriptors);
        visitor.visit_opt(self.exception_handlers);
        visitor.visit_opt(self.local_variables);
    }
}

/// Interpreter code of a function.
pub struct Bytecode {
    instructions: Box<[u8]>,
    pub function: Option<ObjectId>,
    pub object_pool: Option<ObjectId>,
    pub pc_descriptors: Option<ObjectId>,
    pub exception_handlers: Option<ObjectId>,
    pub local_variables: Option<ObjectId>,
}

impl Bytecode {
    pub fn new(instructions: Vec<u8>, object_pool: Option<ObjectId>) -> Self {
        Self {
            instructions: instructions.into_boxed_slice(),
            function: None,
            object_pool,
            pc_descriptors: None,
            exception_handlers: None,
            local_variables: None,
        }
    }

    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    pub fn size(&self) -> usize {
        self.instructions.len()
    }
}

impl Visitable for Bytecode {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_opt(self.function);
        visitor.visit_opt(self.object_pool);
        visitor.visit_opt(self.pc_descriptors);
        visitor.visit_opt(self.exception_handlers);
        visitor.visit_opt(self.local_variables);
    }
}

impl Isolate {
    pub fn new_code(&self, instructions: &[u8], is_optimized: bool) -> ObjectResult<ObjectId> {
        self.allocate(Code::new(instructions, is_optimized), Space::Old)
    }

    pub fn new_bytecode(&self, instructions: Vec<u8>, object_pool: Option<ObjectId>) -> ObjectResult<ObjectId> {
        self.allocate(Bytecode::new(instructions, object_pool), Space::Old)
    }

    pub fn is_code_alive(&self, code: ObjectId) -> bool {
        self.heap().read::<Code, _>(code, Code::is_alive)
    }

    /// Code is never patched in place, disabled code stays allocated for
    /// frames still running it.
    pub fn disable_code(&self, code: ObjectId) {
        let was_alive = self
            .heap()
            .write::<Code, _>(code, |c| std::mem::replace(&mut c.is_alive, false));
        if was_alive {
            log::debug!("disabled code {code}");
        }
    }

    pub(crate) fn set_code_owner(&self, code: ObjectId, owner: ObjectId) {
        self.heap().write::<Code, _>(code, |c| c.owner = Some(owner));
    }

    pub fn set_code_pc_descriptors(&self, code: ObjectId, descriptors: ObjectId) {
        self.heap()
            .write::<Code, _>(code, |c| c.pc_descriptors = Some(descriptors));
    }

    fn with_pc_descriptors<R>(
        &self,
        code: ObjectId,
        f: impl FnOnce(&PcDescriptors) -> Option<R>,
    ) -> Option<R> {
        let descriptors = self.heap().read::<Code, _>(code, |c| c.pc_descriptors)?;
        self.heap().read::<PcDescriptors, _>(descriptors, f)
    }

    /// Pc offset of the first descriptor of `kind` for `deopt_id`.
    pub fn code_pc_for_deopt_id(
        &self,
        code: ObjectId,
        deopt_id: i32,
        kind: PcDescriptorKind,
    ) -> Option<u32> {
        self.with_pc_descriptors(code, |descriptors| {
            descriptors
                .iter(kind)
                .find(|d| d.deopt_id == deopt_id)
                .map(|d| d.pc_offset)
        })
    }

    /// Deopt id of the call returning to `pc_offset`.
    pub fn code_deopt_id_at(&self, code: ObjectId, pc_offset: u32) -> Option<i32> {
        self.with_pc_descriptors(code, |descriptors| {
            descriptors
                .iter_all()
                .find(|d| d.pc_offset == pc_offset)
                .map(|d| d.deopt_id)
        })
    }

    /// Source position of the closest descriptor at or before `pc_offset`.
    pub fn code_token_pos_at(&self, code: ObjectId, pc_offset: u32) -> TokenPosition {
        self.with_pc_descriptors(code, |descriptors| {
            descriptors
                .iter_all()
                .filter(|d| d.pc_offset <= pc_offset)
                .max_by_key(|d| d.pc_offset)
                .map(|d| d.token_pos)
        })
        .unwrap_or(TokenPosition::NO_SOURCE)
    }
}
