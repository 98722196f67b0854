//! interp.rs — boucle de dispatch et état d'une VM (§4.2–§4.5, §4.8–§4.9).
//!
//! Chaque `Vm` possède sa pile d'opérandes, sa chaîne de frames et son tas ;
//! `funcs`/`strings` sont partagés en lecture seule via `Arc<Image>` entre la
//! VM racine et toutes les VM enfants créées par `SPAWN; CALL` (§5, "Shared
//! immutable state").

use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, trace};
use vitte_core::{CoreError, Image, Op, Value};

use crate::frame::CallFrame;
use crate::gc;
use crate::heap::{Heap, ObjData, StrData};
use crate::native;
use crate::task::Coroutines;
use crate::{DefaultHost, Host, VmError, VmResult};

fn malformed(offset: usize, what: &str) -> VmError {
    VmError::Core(CoreError::Decode(format!(
        "truncated {what} operand at code offset {offset}"
    )))
}

fn read_u8(code: &[u8], at: usize) -> VmResult<u8> {
    code.get(at).copied().ok_or_else(|| malformed(at, "u8"))
}

fn read_u32_le(code: &[u8], at: usize) -> VmResult<u32> {
    let slice = code.get(at..at + 4).ok_or_else(|| malformed(at, "u32"))?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u64_le(code: &[u8], at: usize) -> VmResult<u64> {
    let slice = code.get(at..at + 8).ok_or_else(|| malformed(at, "u64"))?;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

fn read_f64_le(code: &[u8], at: usize) -> VmResult<f64> {
    Ok(f64::from_bits(read_u64_le(code, at)?))
}

/// Recrée, dans `dst_heap`, l'objet référencé par `value` au sein de
/// `src_heap`, et retourne une nouvelle `Value` valide dans `dst_heap`.
/// Les canaux partagent leur `Arc<ChanShared>` ; chaînes, listes et tuples
/// sont recopiés (récursivement pour les éléments imbriqués). `value` qui
/// n'est pas une référence objet est retournée telle quelle.
fn rehome_value(src_heap: &Heap, dst_heap: &mut Heap, value: Value) -> Value {
    if !value.is_obj() {
        return value;
    }
    let migrated = match src_heap.get(value.as_obj_index()) {
        ObjData::Chan(shared) => ObjData::Chan(Arc::clone(shared)),
        ObjData::Str(StrData::Owned(s)) => ObjData::Str(StrData::Owned(s.clone())),
        ObjData::Str(StrData::Constant { image, index }) => ObjData::Str(StrData::Constant {
            image: Arc::clone(image),
            index: *index,
        }),
        ObjData::List(items) => {
            let items = items.clone();
            let rehomed = items
                .into_iter()
                .map(|item| rehome_value(src_heap, dst_heap, item))
                .collect();
            ObjData::List(rehomed)
        }
        ObjData::Tuple(items) => {
            let items = items.clone();
            let rehomed: Vec<Value> = items
                .iter()
                .map(|item| rehome_value(src_heap, dst_heap, *item))
                .collect();
            ObjData::Tuple(rehomed.into_boxed_slice())
        }
    };
    Value::from_obj_index(dst_heap.alloc(migrated))
}

/// Une instance de VM : une pile d'opérandes, une chaîne de frames, un tas
/// privé, et l'image partagée dont elle exécute une fonction.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    heap: Heap,
    image: Arc<Image>,
    spawn_pending: bool,
    coros: Coroutines,
    is_coro: bool,
    trace_opcodes: bool,
    host: Arc<Mutex<dyn Host>>,
}

impl Vm {
    /// Construit la VM racine, positionnée sur la fonction de démarrage de
    /// l'image.
    #[must_use]
    pub fn new_root(image: Arc<Image>) -> Self {
        let start = image.start_function_index();
        Vm {
            stack: Vec::with_capacity(64),
            frames: vec![CallFrame::root(start)],
            heap: Heap::new(),
            image,
            spawn_pending: false,
            coros: Coroutines::new(),
            is_coro: false,
            trace_opcodes: false,
            host: Arc::new(Mutex::new(DefaultHost)),
        }
    }

    /// Construit une tâche enfant avec un tas déjà préparé (arguments
    /// déjà rapatriés par [`rehome_value`] dans ce tas, voir `spawn_task`) et
    /// l'hôte partagé de son parent.
    fn new_child_with_heap(
        image: Arc<Image>,
        func_index: u32,
        args: Vec<Value>,
        heap: Heap,
        host: Arc<Mutex<dyn Host>>,
    ) -> Self {
        Vm {
            stack: Vec::with_capacity(32),
            frames: vec![CallFrame::called(func_index, args, 0)],
            heap,
            image,
            spawn_pending: false,
            coros: Coroutines::new(),
            is_coro: true,
            trace_opcodes: false,
            host,
        }
    }

    /// Active la trace par-opcode (utilisée par `vitte-cli --trace-opcodes`).
    #[must_use]
    pub fn with_trace_opcodes(mut self, trace: bool) -> Self {
        self.trace_opcodes = trace;
        self
    }

    /// Remplace l'hôte (`PRINT`/`print` natif) par celui fourni — utilisé par
    /// les tests pour capturer la sortie, et par tout embarqueur qui veut
    /// rediriger la sortie du runtime ailleurs que `stdout`.
    #[must_use]
    pub fn with_host(mut self, host: Arc<Mutex<dyn Host>>) -> Self {
        self.host = host;
        self
    }

    /// Charge une image et exécute sa VM racine jusqu'à terminaison.
    pub fn run_image(image: Arc<Image>, trace_opcodes: bool) -> VmResult<()> {
        Vm::new_root(image).with_trace_opcodes(trace_opcodes).run()
    }

    /// Octets actuellement comptés comme alloués dans le tas privé de cette
    /// VM (utile aux tests d'isolation entre tâches, §8 propriété 8).
    #[must_use]
    pub fn heap_allocated(&self) -> u64 {
        self.heap.allocated()
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames
            .last()
            .expect("frame stack is never empty while the interpreter loop runs")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames
            .last_mut()
            .expect("frame stack is never empty while the interpreter loop runs")
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= vitte_core::MAX_STACK {
            return Err(VmError::StackOverflow {
                max: vitte_core::MAX_STACK,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn pop_args(&mut self, argc: u32) -> VmResult<Vec<Value>> {
        let mut args = vec![Value::from_f64(0.0); argc as usize];
        for slot in args.iter_mut().rev() {
            *slot = self.pop()?;
        }
        Ok(args)
    }

    /// Boucle de dispatch principale : un opcode par itération, jusqu'à ce
    /// que `RETURN` à profondeur zéro la termine (racine ou tâche).
    pub fn run(&mut self) -> VmResult<()> {
        debug!(is_coro = self.is_coro, "entering dispatch loop");
        loop {
            if self.heap.should_collect() {
                debug!(allocated = self.heap.allocated(), "triggering GC cycle");
                gc::collect(&mut self.heap, &self.stack, &self.frames);
            }

            let (func_index, ip) = {
                let frame = self.current_frame();
                (frame.func_index, frame.ip)
            };
            let code = self
                .image
                .function_code(func_index)
                .ok_or(VmError::UnknownFunction(func_index))?;

            if ip >= code.len() {
                if self.op_return()? {
                    break;
                }
                continue;
            }

            let opcode_byte = code[ip];
            let op = Op::try_from(opcode_byte).map_err(|e| VmError::UnknownOpcode(e.0))?;
            if self.trace_opcodes {
                trace!(ip, op = %op, "dispatch");
            }

            if self.dispatch(op, code, ip)? {
                break;
            }
        }

        self.coros.join_all()?;
        gc::collect(&mut self.heap, &self.stack, &self.frames);
        Ok(())
    }

    fn dispatch(&mut self, op: Op, code: &[u8], ip: usize) -> VmResult<bool> {
        let mut next_ip = ip + 1 + op.operand_len();
        let mut halt = false;

        match op {
            Op::Add => self.op_add()?,
            Op::Sub => self.op_binary_f64(|lhs, rhs| lhs - rhs)?,
            Op::Mul => self.op_binary_f64(|lhs, rhs| lhs * rhs)?,
            Op::Div => self.op_binary_f64(|lhs, rhs| lhs / rhs)?,
            Op::Mod => self.op_binary_f64(|lhs, rhs| lhs % rhs)?,
            Op::Neg => {
                let v = self.pop()?;
                self.push(Value::from_f64(-v.as_f64()))?;
            }
            Op::Not => {
                let v = self.pop()?;
                self.push(Value::from_bool(!v.as_bool()))?;
            }
            Op::And => self.op_binary_bool(|lhs, rhs| lhs && rhs)?,
            Op::Or => self.op_binary_bool(|lhs, rhs| lhs || rhs)?,
            Op::Equal => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::from_bool(lhs == rhs))?;
            }
            Op::NotEqual => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::from_bool(lhs != rhs))?;
            }
            Op::Less => self.op_compare_f64(|lhs, rhs| lhs < rhs)?,
            Op::LessEqual => self.op_compare_f64(|lhs, rhs| lhs <= rhs)?,
            Op::Greater => self.op_compare_f64(|lhs, rhs| lhs > rhs)?,
            Op::GreaterEqual => self.op_compare_f64(|lhs, rhs| lhs >= rhs)?,
            Op::True => self.push(Value::from_bool(true))?,
            Op::False => self.push(Value::from_bool(false))?,
            Op::Jump => {
                next_ip = read_u32_le(code, ip + 1)? as usize;
            }
            Op::JumpIfFalse => {
                let cond = self.pop()?;
                if !cond.as_bool() {
                    next_ip = read_u32_le(code, ip + 1)? as usize;
                }
            }
            Op::Store => self.op_store()?,
            Op::Index => self.op_index()?,
            Op::Append => self.op_append()?,
            Op::Length => self.op_length()?,
            Op::List => {
                let n = read_u32_le(code, ip + 1)?;
                self.op_list(n)?;
            }
            Op::ConstU64 => {
                let v = read_u64_le(code, ip + 1)?;
                self.push(Value::from_f64(v as f64))?;
            }
            Op::ConstU32 => {
                let v = read_u32_le(code, ip + 1)?;
                self.push(Value::from_raw_tag(v as u64))?;
            }
            Op::ConstU8 => {
                let v = read_u8(code, ip + 1)?;
                self.push(Value::from_raw_tag(v as u64))?;
            }
            Op::Str => {
                let idx = read_u32_le(code, ip + 1)?;
                self.op_string(idx)?;
            }
            Op::DefLocal => {
                let idx = read_u32_le(code, ip + 1)?;
                let value = self.pop()?;
                let frame = self.current_frame_mut();
                frame.ensure_local_slot(idx);
                frame.locals[idx as usize] = value;
            }
            Op::GetLocal => {
                let idx = read_u32_le(code, ip + 1)?;
                let value = self.current_frame().locals[idx as usize];
                self.push(value)?;
            }
            Op::Assign => {
                let idx = read_u32_le(code, ip + 1)?;
                let value = self.pop()?;
                self.current_frame_mut().locals[idx as usize] = value;
            }
            Op::Call => {
                let funcidx = read_u32_le(code, ip + 1)?;
                let argc = read_u32_le(code, ip + 5)?;
                self.op_call(funcidx, argc)?;
            }
            Op::Return => {
                halt = self.op_return()?;
            }
            Op::Print => self.op_print()?,
            Op::Pop => {
                self.pop()?;
            }
            Op::MakeList => self.op_make_list()?,
            Op::MakeTuple => {
                let n = read_u32_le(code, ip + 1)?;
                self.op_make_tuple(n)?;
            }
            Op::NativeCall => {
                let funcidx = read_u32_le(code, ip + 1)?;
                let argc = read_u32_le(code, ip + 5)?;
                self.op_native_call(funcidx, argc)?;
            }
            Op::ConstDouble => {
                let v = read_f64_le(code, ip + 1)?;
                self.push(Value::from_f64(v))?;
            }
            Op::MakeChan => self.op_make_chan()?,
            Op::ChanRead => self.op_chan_read()?,
            Op::ChanWrite => self.op_chan_write()?,
            Op::Spawn => {
                self.spawn_pending = true;
            }
        }

        if !halt {
            self.current_frame_mut().ip = next_ip;
        }
        Ok(halt)
    }

    fn op_binary_f64(&mut self, f: impl Fn(f64, f64) -> f64) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(Value::from_f64(f(lhs.as_f64(), rhs.as_f64())))
    }

    fn op_compare_f64(&mut self, f: impl Fn(f64, f64) -> bool) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(Value::from_bool(f(lhs.as_f64(), rhs.as_f64())))
    }

    fn op_binary_bool(&mut self, f: impl Fn(bool, bool) -> bool) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(Value::from_bool(f(lhs.as_bool(), rhs.as_bool())))
    }

    /// `ADD` : concaténation si les deux opérandes sont des objets, sinon
    /// addition flottante (§4.2).
    fn op_add(&mut self) -> VmResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        if lhs.is_obj() && rhs.is_obj() {
            let concatenated = self.concat_strings(lhs, rhs)?;
            self.push(concatenated)
        } else {
            self.push(Value::from_f64(lhs.as_f64() + rhs.as_f64()))
        }
    }

    fn concat_strings(&mut self, lhs: Value, rhs: Value) -> VmResult<Value> {
        let lhs_str = self.expect_str(lhs)?.to_owned();
        let rhs_str = self.expect_str(rhs)?.to_owned();
        let mut combined = String::with_capacity(lhs_str.len() + rhs_str.len());
        combined.push_str(&lhs_str);
        combined.push_str(&rhs_str);
        let idx = self
            .heap
            .alloc(ObjData::Str(StrData::Owned(combined.into_boxed_str())));
        Ok(Value::from_obj_index(idx))
    }

    fn expect_str(&self, value: Value) -> VmResult<&str> {
        match self.heap.get(value.as_obj_index()) {
            ObjData::Str(s) => Ok(s.as_str()),
            other => Err(VmError::TypeMismatch {
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    fn expect_list_mut(&mut self, value: Value) -> VmResult<&mut Vec<Value>> {
        match self.heap.get_mut(value.as_obj_index()) {
            ObjData::List(items) => Ok(items),
            other => Err(VmError::TypeMismatch {
                expected: "list",
                found: other.kind(),
            }),
        }
    }

    fn expect_chan(&self, value: Value) -> VmResult<Arc<crate::ChanShared>> {
        match self.heap.get(value.as_obj_index()) {
            ObjData::Chan(shared) => Ok(Arc::clone(shared)),
            other => Err(VmError::TypeMismatch {
                expected: "channel",
                found: other.kind(),
            }),
        }
    }

    fn value_length(&self, value: Value) -> VmResult<usize> {
        match self.heap.get(value.as_obj_index()) {
            ObjData::List(items) => Ok(items.len()),
            ObjData::Tuple(items) => Ok(items.len()),
            other => Err(VmError::TypeMismatch {
                expected: "list or tuple",
                found: other.kind(),
            }),
        }
    }

    fn index_value(&self, container: Value, index: i64) -> VmResult<Value> {
        let get = |items: &[Value]| -> VmResult<Value> {
            if index < 0 || index as usize >= items.len() {
                return Err(VmError::IndexOutOfBounds {
                    index: index.max(0) as u64,
                    length: items.len() as u64,
                });
            }
            Ok(items[index as usize])
        };
        match self.heap.get(container.as_obj_index()) {
            ObjData::List(items) => get(items),
            ObjData::Tuple(items) => get(items),
            other => Err(VmError::TypeMismatch {
                expected: "list or tuple",
                found: other.kind(),
            }),
        }
    }

    fn op_store(&mut self) -> VmResult<()> {
        let index_v = self.pop()?;
        let container_v = self.pop()?;
        let value = self.pop()?;
        let index = index_v.as_f64().trunc() as i64;
        let items = self.expect_list_mut(container_v)?;
        if index < 0 || index as usize >= items.len() {
            return Err(VmError::IndexOutOfBounds {
                index: index.max(0) as u64,
                length: items.len() as u64,
            });
        }
        items[index as usize] = value;
        Ok(())
    }

    fn op_index(&mut self) -> VmResult<()> {
        let index_v = self.pop()?;
        let container_v = self.pop()?;
        let index = index_v.as_f64().trunc() as i64;
        let value = self.index_value(container_v, index)?;
        self.push(value)
    }

    fn op_append(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let container_v = self.pop()?;
        self.expect_list_mut(container_v)?.push(value);
        Ok(())
    }

    fn op_length(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let len = self.value_length(value)?;
        self.push(Value::from_f64(len as f64))
    }

    fn op_list(&mut self, n: u32) -> VmResult<()> {
        let mut items = vec![Value::from_f64(0.0); n as usize];
        for slot in items.iter_mut().rev() {
            *slot = self.pop()?;
        }
        let idx = self.heap.alloc(ObjData::List(items));
        self.push(Value::from_obj_index(idx))
    }

    fn op_make_tuple(&mut self, n: u32) -> VmResult<()> {
        let mut items = vec![Value::from_f64(0.0); n as usize];
        for slot in items.iter_mut().rev() {
            *slot = self.pop()?;
        }
        let idx = self
            .heap
            .alloc(ObjData::Tuple(items.into_boxed_slice()));
        self.push(Value::from_obj_index(idx))
    }

    fn op_make_list(&mut self) -> VmResult<()> {
        let default = self.pop()?;
        let len_v = self.pop()?;
        let len = len_v.as_f64().max(0.0) as usize;
        let items = vec![default; len];
        let idx = self.heap.alloc(ObjData::List(items));
        self.push(Value::from_obj_index(idx))
    }

    fn op_string(&mut self, string_index: u32) -> VmResult<()> {
        let idx = self.heap.alloc(ObjData::Str(StrData::Constant {
            image: Arc::clone(&self.image),
            index: string_index,
        }));
        self.push(Value::from_obj_index(idx))
    }

    fn op_call(&mut self, funcidx: u32, argc: u32) -> VmResult<()> {
        let args = self.pop_args(argc)?;
        if self.spawn_pending {
            self.spawn_pending = false;
            self.spawn_task(funcidx, args)?;
        } else {
            let depth = self.current_frame().depth + 1;
            if depth >= vitte_core::MAX_CALL_DEPTH {
                return Err(VmError::CallDepthExceeded {
                    max: vitte_core::MAX_CALL_DEPTH,
                });
            }
            self.frames.push(CallFrame::called(funcidx, args, depth));
        }
        Ok(())
    }

    /// Démarre une tâche enfant sur un thread neuf. Les arguments qui
    /// référencent un objet du tas (ex. un canal) sont rapatriés dans le tas
    /// de l'enfant avant le démarrage du thread plutôt que réutilisés tels
    /// quels : un index d'arène n'a de sens que dans le tas qui l'a produit,
    /// et chaque tâche possède le sien (§9, "Object ownership across
    /// tasks"). Les canaux restent partagés via le `Arc<ChanShared>` sous-
    /// jacent, qui est cloné plutôt que recréé.
    fn spawn_task(&mut self, funcidx: u32, args: Vec<Value>) -> VmResult<()> {
        let image = Arc::clone(&self.image);
        let host = Arc::clone(&self.host);
        let mut child_heap = Heap::new();
        let rehomed_args: Vec<Value> = args
            .iter()
            .map(|v| rehome_value(&self.heap, &mut child_heap, *v))
            .collect();
        debug!(funcidx, "spawning task");
        let handle = thread::spawn(move || {
            let mut child = Vm::new_child_with_heap(image, funcidx, rehomed_args, child_heap, host);
            child.run()
        });
        self.coros.push(handle)
    }

    fn op_native_call(&mut self, funcidx: u32, argc: u32) -> VmResult<()> {
        let args = self.pop_args(argc)?;
        if let Some(result) = native::call(self, funcidx, &args)? {
            self.push(result)?;
        }
        Ok(())
    }

    /// `RETURN` : termine le thread d'une tâche ou la boucle racine à
    /// profondeur zéro ; sinon dépile la frame courante (§4.3, §4.8).
    fn op_return(&mut self) -> VmResult<bool> {
        let depth = self.current_frame().depth;
        if depth == 0 {
            return Ok(true);
        }
        self.frames.pop();
        Ok(false)
    }

    fn op_make_chan(&mut self) -> VmResult<()> {
        let shared = Arc::new(crate::ChanShared::new(vitte_core::DEFAULT_CHAN_CAPACITY));
        let idx = self.heap.alloc(ObjData::Chan(shared));
        self.push(Value::from_obj_index(idx))
    }

    /// `CHAN_WRITE` : seules les valeurs primitives (nombre, booléen)
    /// transitent par un canal. Un canal traverse les threads via son
    /// `Arc<ChanShared>`, mais chaque tâche a son propre tas — une valeur
    /// objet transmise telle quelle porterait un index d'arène qui n'a
    /// aucun sens dans le tas du lecteur (§9, "Object ownership across
    /// tasks" ; option recommandée retenue ici plutôt qu'un tas partagé).
    fn op_chan_write(&mut self) -> VmResult<()> {
        let chan_v = self.pop()?;
        let value = self.pop()?;
        let shared = self.expect_chan(chan_v)?;
        if value.is_obj() {
            return Err(VmError::TypeMismatch {
                expected: "primitive channel payload",
                found: self.heap.get(value.as_obj_index()).kind(),
            });
        }
        shared.send(value);
        Ok(())
    }

    fn op_chan_read(&mut self) -> VmResult<()> {
        let chan_v = self.pop()?;
        let shared = self.expect_chan(chan_v)?;
        let value = shared.recv();
        self.push(value)
    }

    fn op_print(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let s = self.format_value(value);
        self.print_to_host(&s);
        Ok(())
    }

    /// Écrit `s` via l'hôte courant (partagé avec `native::native_print`/
    /// `native::native_clear_screen`, voir `native.rs`).
    pub(crate) fn print_to_host(&self, s: &str) {
        self.host.lock().expect("host mutex poisoned").print(s);
    }

    /// Rendu textuel d'une valeur, utilisé par `PRINT` et par `native_print`.
    /// Construit dans un `String` plutôt qu'avec un `sprintf` qui s'aliase
    /// sur lui-même (§9, bug relevé dans `stringify`).
    pub fn stringify(&self, value: Value) -> String {
        self.format_value(value)
    }

    fn format_value(&self, value: Value) -> String {
        if value.is_bool() {
            (if value.as_bool() { "true" } else { "false" }).to_owned()
        } else if value.is_number() {
            format!("{:.6}", value.as_f64())
        } else if value.is_obj() {
            self.format_obj(value.as_obj_index())
        } else {
            String::new()
        }
    }

    fn format_obj(&self, index: u32) -> String {
        match self.heap.get(index) {
            ObjData::Str(s) => s.as_str().to_owned(),
            ObjData::List(items) => {
                let mut out = String::from("[");
                for item in items {
                    out.push_str(&self.format_value(*item));
                    out.push_str(", ");
                }
                out.push(']');
                out
            }
            ObjData::Tuple(items) => {
                let mut out = String::from("(");
                for (i, item) in items.iter().enumerate() {
                    out.push_str(&self.format_value(*item));
                    if i + 1 != items.len() {
                        out.push_str(", ");
                    }
                }
                out.push(')');
                out
            }
            ObjData::Chan(_) => "<channel>".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_core::Image;

    fn image_with_functions(start: u32, funcs: Vec<Vec<u8>>) -> Arc<Image> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&start.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // string_count
        buf.extend_from_slice(&(funcs.len() as u32).to_le_bytes());
        for code in &funcs {
            buf.extend_from_slice(&(code.len() as u32).to_le_bytes());
            buf.extend_from_slice(code);
        }
        Arc::new(Image::decode(buf).unwrap())
    }

    fn push_const_double(code: &mut Vec<u8>, value: f64) {
        code.push(Op::ConstDouble as u8);
        code.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    #[test]
    fn add_two_constants_and_print() {
        let mut code = Vec::new();
        push_const_double(&mut code, 2.0);
        push_const_double(&mut code, 3.0);
        code.push(Op::Add as u8);
        code.push(Op::Print as u8);
        code.push(Op::Return as u8);

        let image = image_with_functions(0, vec![code]);
        let mut vm = Vm::new_root(image);
        vm.run().unwrap();
    }

    #[test]
    fn def_local_then_get_local_round_trips() {
        let mut code = Vec::new();
        push_const_double(&mut code, 42.0);
        code.push(Op::DefLocal as u8);
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(Op::GetLocal as u8);
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(Op::Pop as u8);
        code.push(Op::Return as u8);

        let image = image_with_functions(0, vec![code]);
        let mut vm = Vm::new_root(image);
        vm.run().unwrap();
    }

    #[test]
    fn list_index_out_of_bounds_is_fatal() {
        let mut code = Vec::new();
        code.push(Op::List as u8);
        code.extend_from_slice(&0u32.to_le_bytes()); // empty list
        push_const_double(&mut code, 0.0); // index 0, out of range
        code.push(Op::Index as u8);
        code.push(Op::Return as u8);

        let image = image_with_functions(0, vec![code]);
        let mut vm = Vm::new_root(image);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, VmError::IndexOutOfBounds { .. }));
    }

    #[test]
    fn call_depth_limit_is_enforced() {
        // fn 0: CALL fn 0, 0 args — infinitely recurses until depth exceeded.
        let mut code = Vec::new();
        code.push(Op::Call as u8);
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(Op::Return as u8);

        let image = image_with_functions(0, vec![code]);
        let mut vm = Vm::new_root(image);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, VmError::CallDepthExceeded { .. }));
    }

    #[test]
    fn unknown_opcode_byte_is_rejected() {
        let code = vec![200u8];
        let image = image_with_functions(0, vec![code]);
        let mut vm = Vm::new_root(image);
        let err = vm.run().unwrap_err();
        assert!(matches!(err, VmError::UnknownOpcode(200)));
    }
}
