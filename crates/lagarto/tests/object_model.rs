//! Property-model semantics observed end to end: attribute enforcement,
//! prototype shadowing, accessor pairs, enumeration.

use lagarto::{Engine, ErrorKind};
use pretty_assertions::assert_eq;

fn eval_ok(source: &str) -> String {
    let mut engine = Engine::new();
    engine.set_print_last_throw(false);
    engine.eval_text("object.js", source).expect("script should not throw")
}

fn eval_err(source: &str) -> lagarto::Exception {
    let mut engine = Engine::new();
    engine.set_print_last_throw(false);
    engine.eval_text("object.js", source).expect_err("script should throw")
}

#[test]
fn put_then_get_round_trips() {
    assert_eq!(eval_ok("var o = {}; o.k = 'v'; o.k;"), "v");
    assert_eq!(eval_ok("var o = {}; o[3] = 'e'; o[3];"), "e");
    assert_eq!(eval_ok("var o = {}; o['3'] = 'e'; o[3];"), "e");
    assert_eq!(eval_ok("var o = {}; o[3.0] = 'e'; o['3'];"), "e");
}

#[test]
fn numeric_strings_classify_as_elements() {
    // A digit-only string designator and the matching integer address the
    // same slot; a non-canonical numeric string does not.
    assert_eq!(eval_ok("var o = {}; o['7'] = 'a'; (o[7] === 'a') + '';"), "true");
    assert_eq!(eval_ok("var o = {}; o['1.5'] = 'a'; o[1.5];"), "a");
}

#[test]
fn readonly_is_silent_sloppy_and_throws_strict() {
    assert_eq!(
        eval_ok("var o = {}; Object.defineProperty(o, 'x', {value: 1}); o.x = 2; o.x + '';"),
        "1"
    );
    let exception = eval_err("\"use strict\"; var o = {}; Object.defineProperty(o, 'x', {value: 1}); o.x = 2;");
    assert_eq!(exception.kind, ErrorKind::TypeError);
}

#[test]
fn non_configurable_delete_fails() {
    assert_eq!(
        eval_ok("var o = {}; Object.defineProperty(o, 'x', {value: 1}); (delete o.x) + ',' + o.x;"),
        "false,1"
    );
    let exception = eval_err("\"use strict\"; var o = {}; Object.defineProperty(o, 'x', {value: 1}); delete o.x;");
    assert_eq!(exception.kind, ErrorKind::TypeError);
}

#[test]
fn hidden_properties_skip_enumeration() {
    let source = "var o = {a: 1};\n\
                  Object.defineProperty(o, 'h', {value: 2, enumerable: false});\n\
                  var s = ''; for (var k in o) s += k; s;";
    assert_eq!(eval_ok(source), "a");
    assert_eq!(
        eval_ok("var o = {}; Object.defineProperty(o, 'h', {value: 2}); Object.getOwnPropertyNames(o).join(',');"),
        "h"
    );
}

#[test]
fn prototype_chain_shadowing() {
    let source = "function A(){} A.prototype.x = 'proto';\n\
                  var a = new A();\n\
                  var before = a.x;\n\
                  a.x = 'own';\n\
                  before + ',' + a.x + ',' + A.prototype.x;";
    assert_eq!(eval_ok(source), "proto,own,proto");
}

#[test]
fn readonly_prototype_slot_forbids_shadowing() {
    let source = "function A(){}\n\
                  Object.defineProperty(A.prototype, 'x', {value: 'locked'});\n\
                  var a = new A(); \n\
                  try { a.x = 'mine'; } catch (e) {}\n\
                  a.x;";
    assert_eq!(eval_ok(source), "locked");
}

#[test]
fn accessors_pair_up() {
    let source = "var o = {};\n\
                  Object.defineProperty(o, 'v', {\n\
                    get: function(){ return this._v || 0; },\n\
                    set: function(x){ this._v = x + 1; }\n\
                  });\n\
                  var before = o.v; o.v = 10; before + ',' + o.v;";
    assert_eq!(eval_ok(source), "0,11");
}

#[test]
fn getter_only_assignment_is_ignored_sloppy() {
    let source = "var o = { get v() { return 1; } }; o.v = 9; o.v + '';";
    assert_eq!(eval_ok(source), "1");
}

#[test]
fn getter_only_assignment_throws_strict() {
    let exception = eval_err("\"use strict\"; var o = { get v() { return 1; } }; o.v = 9;");
    assert_eq!(exception.kind, ErrorKind::TypeError);
}

#[test]
fn sealed_objects_reject_new_members() {
    assert_eq!(eval_ok("var o = Object.seal({a: 1}); o.b = 2; ('b' in o) + ',' + o.a;"), "false,1");
    assert_eq!(eval_ok("var o = Object.seal({a: 1}); o.a = 3; o.a + '';"), "3");
    assert_eq!(eval_ok("var o = Object.seal({a: 1}); (delete o.a) + '';"), "false");
}

#[test]
fn sealed_trailing_elements_pin_array_length() {
    let source = "var a = [0, 1, 2];\n\
                  Object.defineProperty(a, 1, {value: 'pinned'});\n\
                  a.length = 0;\n\
                  a.length + ',' + a[1];";
    assert_eq!(eval_ok(source), "2,pinned");
}

#[test]
fn large_indices_fall_back_to_members() {
    let source = "var o = {}; o[16777216] = 'big'; o[16777216];";
    assert_eq!(eval_ok(source), "big");
    assert_eq!(eval_ok("var o = {}; o[16777216] = 'big'; ('16777216' in o) + '';"), "true");
}

#[test]
fn string_objects_expose_characters() {
    assert_eq!(eval_ok("new String('abc')[1];"), "b");
    assert_eq!(eval_ok("new String('abc').length + '';"), "3");
    assert_eq!(eval_ok("'abc'.length + '';"), "3");
}

#[test]
fn has_own_versus_inherited() {
    let source = "function A(){} A.prototype.p = 1;\n\
                  var a = new A(); a.q = 2;\n\
                  '' + a.hasOwnProperty('q') + a.hasOwnProperty('p') + ('p' in a);";
    assert_eq!(eval_ok(source), "truefalsetrue");
}

#[test]
fn property_is_enumerable_checks_own_visible() {
    let source = "var o = {a: 1};\n\
                  Object.defineProperty(o, 'h', {value: 1, enumerable: false});\n\
                  '' + o.propertyIsEnumerable('a') + o.propertyIsEnumerable('h') + o.propertyIsEnumerable('m');";
    assert_eq!(eval_ok(source), "truefalsefalse");
}

#[test]
fn is_prototype_of_walks_the_chain() {
    let source = "function A(){} function B(){}\n\
                  B.prototype = new A();\n\
                  var b = new B();\n\
                  '' + A.prototype.isPrototypeOf(b) + Object.prototype.isPrototypeOf(b);";
    assert_eq!(eval_ok(source), "truetrue");
}
