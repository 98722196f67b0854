//! native.rs — table des fonctions natives (§4.9, supplémentée).
//!
//! `spec.md` ne fixe que l'interface de dispatch : `(vm, args[]) -> valeur
//! optionnelle poussée`, arguments dépilés dans l'ordre source. La table
//! elle-même est un collaborateur externe. Ce module en fournit une
//! implémentation concrète, alignée index par index sur
//! `original_source/sahl.c`'s `native_functions[]`, pour que le crate soit
//! exécutable de bout en bout sans dépendre d'un front-end externe.
//!
//! Deux bugs relevés par la spec (§9, "Open questions / likely bugs") sont
//! corrigés plutôt que reconduits :
//! - `native_sleep` convertit son argument via `as_f64` avant de dormir, au
//!   lieu de passer le bit pattern brut de la `Value` à `sleep()`.
//! - `native_rand` vérifie l'arité de ses arguments avant de lire un
//!   éventuel décalage, au lieu de faire confiance à une convention d'appel
//!   non vérifiée.

use std::thread;
use std::time::Duration;

use vitte_core::Value;

use crate::interp::Vm;
use crate::{VmError, VmResult};

/// Signature d'une fonction native : reçoit les arguments déjà dépilés dans
/// l'ordre source, peut pousser au plus une valeur de retour.
pub type NativeFn = fn(&mut Vm, &[Value]) -> VmResult<Option<Value>>;

fn require_arg(name: &'static str, args: &[Value], min: usize) -> VmResult<()> {
    if args.len() < min {
        return Err(VmError::NativeArity {
            name,
            expected: min,
            got: args.len(),
        });
    }
    Ok(())
}

fn native_clear_screen(vm: &mut Vm, _args: &[Value]) -> VmResult<Option<Value>> {
    vm.print_to_host("\x1b[2J\x1b[1;1H");
    Ok(None)
}

fn native_rand(_vm: &mut Vm, args: &[Value]) -> VmResult<Option<Value>> {
    require_arg("rand", args, 1)?;
    let range = args[0].as_f64() as i64;
    let offset = args.get(1).map(|v| v.as_f64()).unwrap_or(0.0);
    let range = range.max(1);
    let r = pseudo_rand() % range;
    Ok(Some(Value::from_f64(r as f64 + offset)))
}

fn native_sleep(_vm: &mut Vm, args: &[Value]) -> VmResult<Option<Value>> {
    require_arg("sleep", args, 1)?;
    let seconds = args[0].as_f64();
    if seconds > 0.0 {
        thread::sleep(Duration::from_secs_f64(seconds));
    }
    Ok(None)
}

fn native_randf(_vm: &mut Vm, _args: &[Value]) -> VmResult<Option<Value>> {
    let r = (pseudo_rand() as f64) / (u32::MAX as f64);
    Ok(Some(Value::from_f64(r)))
}

fn native_exp(_vm: &mut Vm, args: &[Value]) -> VmResult<Option<Value>> {
    require_arg("exp", args, 1)?;
    Ok(Some(Value::from_f64(args[0].as_f64().exp())))
}

fn native_pow(_vm: &mut Vm, args: &[Value]) -> VmResult<Option<Value>> {
    require_arg("pow", args, 2)?;
    Ok(Some(Value::from_f64(args[0].as_f64().powf(args[1].as_f64()))))
}

fn native_exit(_vm: &mut Vm, args: &[Value]) -> VmResult<Option<Value>> {
    require_arg("exit", args, 1)?;
    std::process::exit(args[0].as_f64() as i32);
}

fn native_print(vm: &mut Vm, args: &[Value]) -> VmResult<Option<Value>> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&vm.stringify(*arg));
    }
    vm.print_to_host(&out);
    Ok(None)
}

fn native_tanh(_vm: &mut Vm, args: &[Value]) -> VmResult<Option<Value>> {
    require_arg("tanh", args, 1)?;
    Ok(Some(Value::from_f64(args[0].as_f64().tanh())))
}

fn native_log(_vm: &mut Vm, args: &[Value]) -> VmResult<Option<Value>> {
    require_arg("log", args, 1)?;
    Ok(Some(Value::from_f64(args[0].as_f64().ln())))
}

/// Table des natifs, dans le même ordre que l'original : `clear_screen,
/// rand, sleep, randf, exp, pow, exit, print, tanh, log`.
pub const NATIVE_TABLE: &[NativeFn] = &[
    native_clear_screen,
    native_rand,
    native_sleep,
    native_randf,
    native_exp,
    native_pow,
    native_exit,
    native_print,
    native_tanh,
    native_log,
];

/// Invoque la fonction native `index` avec les arguments donnés.
pub fn call(vm: &mut Vm, index: u32, args: &[Value]) -> VmResult<Option<Value>> {
    let f = NATIVE_TABLE
        .get(index as usize)
        .ok_or(VmError::UnknownNative(index))?;
    f(vm, args)
}

/// Générateur congruentiel linéaire minimal : pas de dépendance `rand` dans
/// la pile de l'espace de travail, et l'original n'offre aucune garantie de
/// qualité statistique (`rand() % range`) — seule la disponibilité d'un flux
/// de nombres compte ici.
fn pseudo_rand() -> i64 {
    use std::cell::Cell;
    use std::time::{SystemTime, UNIX_EPOCH};

    thread_local! {
        static STATE: Cell<u64> = Cell::new(0);
    }

    STATE.with(|state| {
        let mut s = state.get();
        if s == 0 {
            s = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x2545F4914F6CDD1D)
                | 1;
        }
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        state.set(s);
        (s >> 1) as i64
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_arity_error_names_the_function() {
        let err = require_arg("pow", &[], 2).unwrap_err();
        match err {
            VmError::NativeArity { name, expected, got } => {
                assert_eq!(name, "pow");
                assert_eq!(expected, 2);
                assert_eq!(got, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pseudo_rand_is_not_constant() {
        let a = pseudo_rand();
        let b = pseudo_rand();
        assert_ne!(a, b);
    }
}
