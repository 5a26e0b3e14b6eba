//! Collector behaviour observed through the public API: reachability is
//! preserved across explicit collections, cycles do not leak livelock the
//! engine, and long allocation loops stay within the safepoint regime.

use lagarto::Engine;
use pretty_assertions::assert_eq;

#[test]
fn globals_survive_collection() {
    let mut engine = Engine::new();
    engine.eval_text("a.js", "var keep = {deep: {value: 41}};").unwrap();
    engine.garbage_collect();
    assert_eq!(engine.eval_text("b.js", "keep.deep.value + 1 + '';").unwrap(), "42");
}

#[test]
fn cycles_are_collectable_and_usable() {
    let mut engine = Engine::new();
    let source = "var a = {}; var b = {back: a}; a.fwd = b; a.fwd.back === a ? 'linked' : 'broken';";
    assert_eq!(engine.eval_text("cycle.js", source).unwrap(), "linked");
    // Drop the only roots, then collect; the cycle must not wedge the
    // sweep and later evaluation must still work.
    engine.eval_text("drop.js", "a = null; b = null;").unwrap();
    engine.garbage_collect();
    assert_eq!(engine.eval_text("after.js", "({ok: true}).ok + '';").unwrap(), "true");
}

#[test]
fn closure_environments_stay_reachable() {
    let mut engine = Engine::new();
    engine
        .eval_text(
            "closure.js",
            "var counter = (function(){ var n = 0; return function(){ return ++n; }; })();",
        )
        .unwrap();
    engine.garbage_collect();
    assert_eq!(engine.eval_text("use.js", "counter() + '' + counter();").unwrap(), "12");
}

#[test]
fn allocation_churn_is_collected_at_safepoints() {
    let mut engine = Engine::new();
    // Enough garbage per iteration to cross the allocation threshold many
    // times over; the loop's live state must survive every sweep.
    let source = "var sum = 0;\n\
                  for (var i = 0; i < 20000; i++) {\n\
                    var tmp = {x: [i, i + 1], s: 'str' + i};\n\
                    sum += tmp.x[0] - i;\n\
                  }\n\
                  sum + '';";
    assert_eq!(engine.eval_text("churn.js", source).unwrap(), "0");
}

#[test]
fn strings_and_prototypes_survive_churn() {
    let mut engine = Engine::new();
    let source = "function T(tag){ this.tag = tag; }\n\
                  T.prototype.describe = function(){ return 'T:' + this.tag; };\n\
                  var keeper = new T('keeper');\n\
                  for (var i = 0; i < 10000; i++) { new T('junk' + i); }\n\
                  keeper.describe();";
    assert_eq!(engine.eval_text("proto.js", source).unwrap(), "T:keeper");
    engine.garbage_collect();
    assert_eq!(engine.eval_text("again.js", "keeper.describe();").unwrap(), "T:keeper");
}

#[test]
fn attached_parse_literals_survive() {
    let mut engine = Engine::new();
    engine.eval_text("lit.js", "function greet(){ return 'esc\\u0061ped'; }").unwrap();
    engine.garbage_collect();
    assert_eq!(engine.eval_text("use.js", "greet();").unwrap(), "escaped");
}
