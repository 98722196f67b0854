//! Scénarios de bout en bout (spec §8) : images assemblées à la main, sans
//! front-end de compilation disponible dans ce dépôt.

use std::sync::{Arc, Mutex};

use vitte_core::{Image, Op};
use vitte_vm::{Host, Vm};

/// Hôte de test : capture la sortie de `PRINT`/`print` natif dans un buffer
/// partagé plutôt que sur `stdout`, pour que les scénarios puissent asserter
/// les valeurs imprimées exigées par la spec (§8).
#[derive(Clone, Default)]
struct CapturingHost(Arc<Mutex<String>>);

impl Host for CapturingHost {
    fn print(&mut self, s: &str) {
        self.0.lock().expect("capturing host mutex poisoned").push_str(s);
    }
}

impl CapturingHost {
    fn captured(&self) -> String {
        self.0.lock().expect("capturing host mutex poisoned").clone()
    }
}

/// Petit assembleur de flux d'octets, pour construire des corps de fonction
/// sans recalculer les offsets de saut à la main.
struct Asm {
    code: Vec<u8>,
}

impl Asm {
    fn new() -> Self {
        Asm { code: Vec::new() }
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    fn op(&mut self, o: Op) -> &mut Self {
        self.code.push(o as u8);
        self
    }

    fn u32_(&mut self, v: u32) -> &mut Self {
        self.code.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn const_double(&mut self, v: f64) -> &mut Self {
        self.op(Op::ConstDouble);
        self.code.extend_from_slice(&v.to_bits().to_le_bytes());
        self
    }

    fn call(&mut self, func: u32, argc: u32) -> &mut Self {
        self.op(Op::Call);
        self.u32_(func).u32_(argc)
    }

    fn native_call(&mut self, native: u32, argc: u32) -> &mut Self {
        self.op(Op::NativeCall);
        self.u32_(native).u32_(argc)
    }

    fn get_local(&mut self, idx: u32) -> &mut Self {
        self.op(Op::GetLocal);
        self.u32_(idx)
    }

    fn def_local(&mut self, idx: u32) -> &mut Self {
        self.op(Op::DefLocal);
        self.u32_(idx)
    }

    fn assign(&mut self, idx: u32) -> &mut Self {
        self.op(Op::Assign);
        self.u32_(idx)
    }

    fn list(&mut self, n: u32) -> &mut Self {
        self.op(Op::List);
        self.u32_(n)
    }

    fn string(&mut self, idx: u32) -> &mut Self {
        self.op(Op::Str);
        self.u32_(idx)
    }

    /// Émet un `JUMP_IF_FALSE` avec une cible à combler plus tard ; retourne
    /// la position de l'opérande à patcher.
    fn jump_if_false_placeholder(&mut self) -> usize {
        self.op(Op::JumpIfFalse);
        let pos = self.code.len();
        self.u32_(0);
        pos
    }

    fn jump_placeholder(&mut self) -> usize {
        self.op(Op::Jump);
        let pos = self.code.len();
        self.u32_(0);
        pos
    }

    fn patch(&mut self, pos: usize, target: u32) {
        self.code[pos..pos + 4].copy_from_slice(&target.to_le_bytes());
    }

    fn into_vec(self) -> Vec<u8> {
        self.code
    }
}

fn build_image(start: u32, strings: &[&[u8]], funcs: Vec<Vec<u8>>) -> Arc<Image> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&start.to_le_bytes());
    buf.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    for s in strings {
        buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        buf.extend_from_slice(s);
    }
    buf.extend_from_slice(&(funcs.len() as u32).to_le_bytes());
    for code in &funcs {
        buf.extend_from_slice(&(code.len() as u32).to_le_bytes());
        buf.extend_from_slice(code);
    }
    Arc::new(Image::decode(buf).expect("hand-built image must decode"))
}

#[test]
fn factorial_of_ten() {
    // fn 0 (main): push 10.0, CALL fn 1, RETURN.
    let mut main_fn = Asm::new();
    main_fn.const_double(10.0);
    main_fn.call(1, 1);
    main_fn.op(Op::Print);
    main_fn.op(Op::Return);

    // fn 1 (fact): if n <= 1 return 1 else return n * fact(n - 1).
    let mut fact = Asm::new();
    fact.get_local(0);
    fact.const_double(1.0);
    fact.op(Op::LessEqual);
    let else_patch = fact.jump_if_false_placeholder();
    fact.const_double(1.0);
    fact.op(Op::Return);
    let else_target = fact.here();
    fact.patch(else_patch, else_target);
    fact.get_local(0);
    fact.get_local(0);
    fact.const_double(1.0);
    fact.op(Op::Sub);
    fact.call(1, 1);
    fact.op(Op::Mul);
    fact.op(Op::Return);

    let image = build_image(0, &[], vec![main_fn.into_vec(), fact.into_vec()]);
    let host = CapturingHost::default();
    Vm::new_root(image)
        .with_host(Arc::new(Mutex::new(host.clone())))
        .run()
        .expect("factorial program runs to completion");
    assert_eq!(host.captured(), "3628800.000000");
}

#[test]
fn fibonacci_twenty() {
    let mut main_fn = Asm::new();
    main_fn.const_double(20.0);
    main_fn.call(1, 1);
    main_fn.op(Op::Print);
    main_fn.op(Op::Return);

    // fn 1 (fib): if n < 2 return n else return fib(n-1) + fib(n-2).
    let mut fib = Asm::new();
    fib.get_local(0);
    fib.const_double(2.0);
    fib.op(Op::Less);
    let else_patch = fib.jump_if_false_placeholder();
    fib.get_local(0);
    fib.op(Op::Return);
    let else_target = fib.here();
    fib.patch(else_patch, else_target);
    fib.get_local(0);
    fib.const_double(1.0);
    fib.op(Op::Sub);
    fib.call(1, 1);
    fib.get_local(0);
    fib.const_double(2.0);
    fib.op(Op::Sub);
    fib.call(1, 1);
    fib.op(Op::Add);
    fib.op(Op::Return);

    let image = build_image(0, &[], vec![main_fn.into_vec(), fib.into_vec()]);
    let host = CapturingHost::default();
    Vm::new_root(image)
        .with_host(Arc::new(Mutex::new(host.clone())))
        .run()
        .expect("fibonacci program runs to completion");
    assert_eq!(host.captured(), "6765.000000");
}

#[test]
fn list_build_and_sum() {
    let mut main_fn = Asm::new();
    for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
        main_fn.const_double(v);
    }
    main_fn.list(5);
    main_fn.def_local(0); // local 0: the list
    main_fn.const_double(0.0);
    main_fn.def_local(1); // local 1: running sum
    for i in 0..5u32 {
        main_fn.get_local(1);
        main_fn.get_local(0);
        main_fn.const_double(i as f64);
        main_fn.op(Op::Index);
        main_fn.op(Op::Add);
        main_fn.assign(1);
    }
    main_fn.get_local(1);
    main_fn.op(Op::Print);
    main_fn.op(Op::Return);

    let image = build_image(0, &[], vec![main_fn.into_vec()]);
    let host = CapturingHost::default();
    Vm::new_root(image)
        .with_host(Arc::new(Mutex::new(host.clone())))
        .run()
        .expect("list build-and-sum runs to completion");
    assert_eq!(host.captured(), "15.000000");
}

#[test]
fn string_concatenation() {
    let mut main_fn = Asm::new();
    main_fn.string(0);
    main_fn.string(1);
    main_fn.op(Op::Add);
    main_fn.op(Op::Print);
    main_fn.op(Op::Return);

    let image = build_image(0, &[b"foo", b"bar"], vec![main_fn.into_vec()]);
    let host = CapturingHost::default();
    Vm::new_root(image)
        .with_host(Arc::new(Mutex::new(host.clone())))
        .run()
        .expect("string concatenation runs to completion");
    assert_eq!(host.captured(), "foobar");
}

#[test]
fn producer_consumer_sums_to_fifty_five() {
    // fn 0 (main): MAKE_CHAN, SPAWN; CALL fn 1 with the channel, then
    // receive 10 values and print their sum.
    let mut main_fn = Asm::new();
    main_fn.op(Op::MakeChan);
    main_fn.def_local(0); // local 0: the channel
    main_fn.get_local(0);
    main_fn.op(Op::Spawn);
    main_fn.call(1, 1);
    main_fn.const_double(0.0);
    main_fn.def_local(1); // local 1: running sum
    for _ in 0..10 {
        main_fn.get_local(1);
        main_fn.get_local(0);
        main_fn.op(Op::ChanRead);
        main_fn.op(Op::Add);
        main_fn.assign(1);
    }
    main_fn.get_local(1);
    main_fn.op(Op::Print);
    main_fn.op(Op::Return);

    // fn 1 (producer task): send 1.0 .. 10.0 into the channel passed as arg 0.
    let mut producer = Asm::new();
    for v in 1..=10 {
        producer.get_local(0);
        producer.const_double(v as f64);
        producer.op(Op::ChanWrite);
    }
    producer.op(Op::Return);

    let image = build_image(0, &[], vec![main_fn.into_vec(), producer.into_vec()]);
    let host = CapturingHost::default();
    Vm::new_root(image)
        .with_host(Arc::new(Mutex::new(host.clone())))
        .run()
        .expect("producer/consumer runs to completion");
    assert_eq!(host.captured(), "55.000000");
}

#[test]
fn spawn_past_max_coros_does_not_deadlock() {
    // fn 0 (main): spawn 130 producer tasks, each given its own channel,
    // then drain every channel. Exercises MAX_COROS backpressure (§4.8).
    const N: u32 = 130;

    let mut main_fn = Asm::new();
    for i in 0..N {
        main_fn.op(Op::MakeChan);
        main_fn.def_local(i);
        main_fn.get_local(i);
        main_fn.op(Op::Spawn);
        main_fn.call(1, 1);
    }
    for i in 0..N {
        main_fn.get_local(i);
        main_fn.op(Op::ChanRead);
        main_fn.op(Op::Pop);
    }
    main_fn.op(Op::Return);

    let mut producer = Asm::new();
    producer.get_local(0);
    producer.const_double(1.0);
    producer.op(Op::ChanWrite);
    producer.op(Op::Return);

    let image = build_image(0, &[], vec![main_fn.into_vec(), producer.into_vec()]);
    Vm::run_image(image, false).expect("spawning past MAX_COROS must not deadlock");
}

#[test]
fn call_depth_limit_terminates_unbounded_recursion() {
    // fn 0: CALL fn 0, 0 args, forever.
    let mut recurse = Asm::new();
    recurse.call(0, 0);
    recurse.op(Op::Return);

    let image = build_image(0, &[], vec![recurse.into_vec()]);
    let err = Vm::run_image(image, false).unwrap_err();
    assert!(matches!(err, vitte_vm::VmError::CallDepthExceeded { .. }));
}

#[test]
fn task_allocation_does_not_change_parent_heap_accounting() {
    // A spawned task allocates a list, discards it, then returns; the
    // parent's own heap accounting must be unaffected, since every task
    // owns a private heap (spec §8 property 8). Compared against a baseline
    // program that performs the same parent-side allocations without ever
    // spawning, so the assertion isn't a magic constant.
    let mut baseline_fn = Asm::new();
    baseline_fn.op(Op::MakeChan);
    baseline_fn.def_local(0);
    baseline_fn.op(Op::Return);
    let baseline_image = build_image(0, &[], vec![baseline_fn.into_vec()]);
    let mut baseline_vm = Vm::new_root(baseline_image);
    baseline_vm.run().expect("baseline program runs to completion");
    let baseline_allocated = baseline_vm.heap_allocated();
    assert!(baseline_allocated > 0, "the channel itself must be counted");

    let mut main_fn = Asm::new();
    main_fn.op(Op::MakeChan);
    main_fn.def_local(0);
    main_fn.get_local(0);
    main_fn.op(Op::Spawn);
    main_fn.call(1, 1);
    main_fn.get_local(0);
    main_fn.op(Op::ChanRead);
    main_fn.op(Op::Pop);
    main_fn.op(Op::Return);

    let mut child = Asm::new();
    for v in [1.0, 2.0, 3.0] {
        child.const_double(v);
    }
    child.list(3);
    child.op(Op::Pop); // the list becomes unreachable in the child's own heap
    child.get_local(0);
    child.const_double(1.0);
    child.op(Op::ChanWrite);
    child.op(Op::Return);

    let image = build_image(0, &[], vec![main_fn.into_vec(), child.into_vec()]);
    let mut vm = Vm::new_root(image);
    vm.run().expect("parent runs to completion");
    assert_eq!(
        vm.heap_allocated(),
        baseline_allocated,
        "a child task's allocations must not leak into the parent's heap accounting"
    );
}
