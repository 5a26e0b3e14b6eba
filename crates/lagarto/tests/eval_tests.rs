//! End-to-end evaluation tests driving the public engine API.

use lagarto::{Engine, ErrorKind};
use pretty_assertions::assert_eq;

fn eval_ok(source: &str) -> String {
    let mut engine = Engine::new();
    engine.set_print_last_throw(false);
    engine.eval_text("test.js", source).expect("script should not throw")
}

fn eval_err(source: &str) -> lagarto::Exception {
    let mut engine = Engine::new();
    engine.set_print_last_throw(false);
    engine
        .eval_text("test.js", source)
        .expect_err("script should throw")
}

// --- end-to-end scenarios --------------------------------------------------

#[test]
fn closure_counter() {
    let source = "var c = (function(){ var n=0; return function(){ return ++n; }; })();\n\
                  c(); c(); c();";
    assert_eq!(eval_ok(source), "3");
}

#[test]
fn prototype_lookup() {
    assert_eq!(eval_ok("function A(){} A.prototype.x=1; var a=new A(); a.x+'';"), "1");
}

#[test]
fn try_finally_ordering() {
    let source = "var o=''; try { try { throw 'e'; } finally { o+='f1;'; } } \
                  catch(x){ o+='c:'+x+';'; } finally { o+='f2;'; } o;";
    assert_eq!(eval_ok(source), "f1;c:e;f2;");
}

#[test]
fn for_in_enumerates_elements_before_members() {
    let source = "var o={}; o[2]=1; o.a=1; o[1]=1; var s=''; for(var k in o) s+=k; s;";
    assert_eq!(eval_ok(source), "12a");
}

#[test]
fn split_by_regex_keeps_captures() {
    assert_eq!(eval_ok("\"a1b2c\".split(/(\\d)/).join('|');"), "a|1|b|2|c");
    assert_eq!(eval_ok("\"a1b2c\".split(/(\\d)/).length + '';"), "5");
}

#[test]
fn strict_sealed_assignment_throws() {
    let exception = eval_err("\"use strict\"; var o={}; Object.defineProperty(o,'x',{value:1}); o.x=2;");
    assert_eq!(exception.kind, ErrorKind::TypeError);
}

// --- expressions -----------------------------------------------------------

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(eval_ok("1 + 2 * 3 - 4 / 2;"), "5");
    assert_eq!(eval_ok("(1 + 2) * 3 + '';"), "9");
    assert_eq!(eval_ok("7 % 4 + '';"), "3");
    assert_eq!(eval_ok("2 * 3.5 + '';"), "7");
    assert_eq!(eval_ok("1 / 0 + '';"), "Infinity");
    assert_eq!(eval_ok("-1 / 0 + '';"), "-Infinity");
    assert_eq!(eval_ok("0 / 0 + '';"), "NaN");
}

#[test]
fn string_concatenation() {
    assert_eq!(eval_ok("'a' + 'b' + 'c';"), "abc");
    assert_eq!(eval_ok("1 + '2';"), "12");
    assert_eq!(eval_ok("'' + true;"), "true");
    assert_eq!(eval_ok("'' + null;"), "null");
    assert_eq!(eval_ok("'' + undefined;"), "undefined");
    assert_eq!(eval_ok("'x' + {};"), "x[object Object]");
    assert_eq!(eval_ok("'' + [1,2,3];"), "1,2,3");
}

#[test]
fn equality_rules() {
    assert_eq!(eval_ok("(1 == '1') + '';"), "true");
    assert_eq!(eval_ok("(1 === '1') + '';"), "false");
    assert_eq!(eval_ok("(null == undefined) + '';"), "true");
    assert_eq!(eval_ok("(null === undefined) + '';"), "false");
    assert_eq!(eval_ok("(NaN == NaN) + '';"), "false");
    assert_eq!(eval_ok("(0 == false) + '';"), "true");
    assert_eq!(eval_ok("('' == false) + '';"), "true");
    assert_eq!(eval_ok("(1 != 2) + '';"), "true");
    assert_eq!(eval_ok("(1 !== 1) + '';"), "false");
}

#[test]
fn relational_rules() {
    assert_eq!(eval_ok("(1 < 2) + '';"), "true");
    assert_eq!(eval_ok("('a' < 'b') + '';"), "true");
    assert_eq!(eval_ok("('10' < '9') + '';"), "true");
    assert_eq!(eval_ok("(10 < 9) + '';"), "false");
    assert_eq!(eval_ok("(2 >= 2) + '';"), "true");
    assert_eq!(eval_ok("(NaN < 1) + '';"), "false");
    assert_eq!(eval_ok("(NaN >= 1) + '';"), "false");
}

#[test]
fn bitwise_and_shifts() {
    assert_eq!(eval_ok("(5 & 3) + '';"), "1");
    assert_eq!(eval_ok("(5 | 3) + '';"), "7");
    assert_eq!(eval_ok("(5 ^ 3) + '';"), "6");
    assert_eq!(eval_ok("(~5) + '';"), "-6");
    assert_eq!(eval_ok("(1 << 4) + '';"), "16");
    assert_eq!(eval_ok("(-16 >> 2) + '';"), "-4");
    assert_eq!(eval_ok("(16 >>> 2) + '';"), "4");
}

#[test]
fn logical_short_circuit() {
    assert_eq!(eval_ok("var n = 0; function f(){ n++; return true; } false && f(); n + '';"), "0");
    assert_eq!(eval_ok("var n = 0; function f(){ n++; return true; } true || f(); n + '';"), "0");
    assert_eq!(eval_ok("(0 || 'fallback');"), "fallback");
    assert_eq!(eval_ok("(1 && 'second');"), "second");
}

#[test]
fn conditional_expression() {
    assert_eq!(eval_ok("(1 ? 'yes' : 'no');"), "yes");
    assert_eq!(eval_ok("(0 ? 'yes' : 'no');"), "no");
    assert_eq!(eval_ok("var x = 5; (x > 3 ? x * 2 : x) + '';"), "10");
}

#[test]
fn typeof_names() {
    assert_eq!(eval_ok("typeof undefined;"), "undefined");
    assert_eq!(eval_ok("typeof null;"), "object");
    assert_eq!(eval_ok("typeof 1;"), "number");
    assert_eq!(eval_ok("typeof 'x';"), "string");
    assert_eq!(eval_ok("typeof true;"), "boolean");
    assert_eq!(eval_ok("typeof {};"), "object");
    assert_eq!(eval_ok("typeof function(){};"), "function");
    assert_eq!(eval_ok("typeof missing;"), "undefined");
}

#[test]
fn unary_operators() {
    assert_eq!(eval_ok("(+'3') + 1 + '';"), "4");
    assert_eq!(eval_ok("(-'3') + '';"), "-3");
    assert_eq!(eval_ok("(!0) + '';"), "true");
    assert_eq!(eval_ok("void 42 + '';"), "undefined");
}

#[test]
fn increment_and_compound_assignment() {
    assert_eq!(eval_ok("var x = 1; x++; x + '';"), "2");
    assert_eq!(eval_ok("var x = 1; (x++) + '';"), "1");
    assert_eq!(eval_ok("var x = 1; (++x) + '';"), "2");
    assert_eq!(eval_ok("var x = 5; x--; x + '';"), "4");
    assert_eq!(eval_ok("var x = 2; x += 3; x + '';"), "5");
    assert_eq!(eval_ok("var x = 2; x *= 3; x + '';"), "6");
    assert_eq!(eval_ok("var x = 8; x >>= 2; x + '';"), "2");
    assert_eq!(eval_ok("var s = 'a'; s += 'b'; s;"), "ab");
    assert_eq!(eval_ok("var o = {n: 1}; o.n += 2; o.n + '';"), "3");
    assert_eq!(eval_ok("var a = [1]; a[0] += 5; a[0] + '';"), "6");
}

#[test]
fn in_and_instanceof() {
    assert_eq!(eval_ok("('a' in {a: 1}) + '';"), "true");
    assert_eq!(eval_ok("('b' in {a: 1}) + '';"), "false");
    assert_eq!(eval_ok("(0 in [7]) + '';"), "true");
    assert_eq!(eval_ok("function T(){} (new T() instanceof T) + '';"), "true");
    assert_eq!(eval_ok("function T(){} ({} instanceof T) + '';"), "false");
}

#[test]
fn delete_operator() {
    assert_eq!(eval_ok("var o = {a: 1}; delete o.a; ('a' in o) + '';"), "false");
    assert_eq!(eval_ok("var o = {a: 1}; (delete o.b) + '';"), "true");
    assert_eq!(eval_ok("var a = [1,2]; delete a[0]; (0 in a) + '';"), "false");
}

#[test]
fn constant_folding_preserves_semantics() {
    // Folded and unfolded paths must agree.
    assert_eq!(eval_ok("1 + 2 + 3 + '';"), "6");
    assert_eq!(eval_ok("var a = 1; a + 2 + 3 + '';"), "6");
    assert_eq!(eval_ok("2 * 3 + 4 * 5 + '';"), "26");
    assert_eq!(eval_ok("-(-3) + '';"), "3");
}

// --- statements ------------------------------------------------------------

#[test]
fn if_else_chains() {
    assert_eq!(eval_ok("var r; if (1) r = 'a'; else r = 'b'; r;"), "a");
    assert_eq!(eval_ok("var r; if (0) r = 'a'; else r = 'b'; r;"), "b");
    assert_eq!(
        eval_ok("function f(x){ if (x < 0) return 'neg'; else if (x === 0) return 'zero'; else return 'pos'; }\n\
                 f(-1) + f(0) + f(1);"),
        "negzeropos"
    );
    assert_eq!(eval_ok("var r = ''; if (1) { r += 'a'; r += 'b'; } r;"), "ab");
}

#[test]
fn while_loops() {
    assert_eq!(eval_ok("var i = 0, s = 0; while (i < 5) { s += i; i++; } s + '';"), "10");
    assert_eq!(eval_ok("var i = 0; do { i++; } while (i < 3); i + '';"), "3");
    assert_eq!(eval_ok("var i = 9; do { i++; } while (i < 3); i + '';"), "10");
}

#[test]
fn for_loops() {
    assert_eq!(eval_ok("var s = 0; for (var i = 0; i < 10; i++) s += i; s + '';"), "45");
    assert_eq!(eval_ok("var s = ''; for (var i = 3; i > 0; i--) s += i; s;"), "321");
    assert_eq!(eval_ok("var s = 0; for (var i = 0; i <= 4; i++) { s += i; } s + '';"), "10");
    assert_eq!(eval_ok("var i = 0; for (;;) { if (i >= 3) break; i++; } i + '';"), "3");
    // Counter mutation inside the body is observed by the loop.
    assert_eq!(eval_ok("var s = ''; for (var i = 0; i < 6; i++) { s += i; i++; } s;"), "024");
}

#[test]
fn break_and_continue() {
    assert_eq!(
        eval_ok("var s = ''; for (var i = 0; i < 5; i++) { if (i === 2) continue; s += i; } s;"),
        "0134"
    );
    assert_eq!(
        eval_ok("var s = ''; for (var i = 0; i < 5; i++) { if (i === 2) break; s += i; } s;"),
        "01"
    );
}

#[test]
fn labelled_break_and_continue() {
    let source = "var s = '';\n\
                  outer: for (var i = 0; i < 3; i++) {\n\
                    for (var j = 0; j < 3; j++) {\n\
                      if (j === 1) continue outer;\n\
                      s += '' + i + j;\n\
                    }\n\
                  } s;";
    assert_eq!(eval_ok(source), "001020");

    let source = "var s = '';\n\
                  outer: for (var i = 0; i < 3; i++) {\n\
                    for (var j = 0; j < 3; j++) {\n\
                      if (i === 1 && j === 1) break outer;\n\
                      s += '' + i + j;\n\
                    }\n\
                  } s;";
    assert_eq!(eval_ok(source), "00010210");
}

#[test]
fn switch_dispatch_and_fallthrough() {
    let source = "function pick(x) {\n\
                    var s = '';\n\
                    switch (x) {\n\
                      case 1: s += 'one;';\n\
                      case 2: s += 'two;'; break;\n\
                      case 3: s += 'three;'; break;\n\
                      default: s += 'other;';\n\
                    }\n\
                    return s;\n\
                  }\n\
                  pick(1) + '|' + pick(2) + '|' + pick(3) + '|' + pick(9);";
    assert_eq!(eval_ok(source), "one;two;|two;|three;|other;");
}

#[test]
fn switch_uses_strict_equality() {
    assert_eq!(
        eval_ok("var r; switch ('1') { case 1: r = 'number'; break; case '1': r = 'string'; break; } r;"),
        "string"
    );
}

#[test]
fn with_statement_scopes_the_object() {
    assert_eq!(eval_ok("var o = {x: 41}; with (o) { x = x + 1; } o.x + '';"), "42");
    assert_eq!(eval_ok("var x = 'outer'; var o = {}; with (o) { x = 'still outer'; } x;"), "still outer");
}

#[test]
fn for_in_skips_hidden_and_walks_prototypes() {
    let source = "function A(){} A.prototype.p = 1;\n\
                  var a = new A(); a.q = 2;\n\
                  var s = ''; for (var k in a) s += k + ';'; s;";
    assert_eq!(eval_ok(source), "q;p;");
}

#[test]
fn automatic_semicolon_insertion() {
    assert_eq!(eval_ok("var a = 1\nvar b = 2\na + b + '';"), "3");
    assert_eq!(eval_ok("function f(){ return\n1; } f() + '';"), "undefined");
}

// --- functions -------------------------------------------------------------

#[test]
fn function_declarations_hoist() {
    assert_eq!(eval_ok("var r = f(); function f() { return 'hoisted'; } r;"), "hoisted");
}

#[test]
fn named_function_expressions_see_themselves() {
    assert_eq!(eval_ok("var f = function fact(n){ return n <= 1 ? 1 : n * fact(n - 1); }; f(5) + '';"), "120");
}

#[test]
fn closures_capture_by_environment() {
    let source = "function make() {\n\
                    var list = [];\n\
                    for (var i = 0; i < 3; i++) {\n\
                      list.push(function(){ return i; });\n\
                    }\n\
                    return list;\n\
                  }\n\
                  var fns = make();\n\
                  '' + fns[0]() + fns[1]() + fns[2]();";
    // var-scoped capture shares one slot.
    assert_eq!(eval_ok(source), "333");
}

#[test]
fn arguments_object() {
    assert_eq!(eval_ok("function f(){ return arguments.length; } f(1, 2, 3) + '';"), "3");
    assert_eq!(eval_ok("function f(a){ return arguments[1]; } f('x', 'y');"), "y");
    assert_eq!(eval_ok("function f(){ return arguments.callee === f; } f() + '';"), "true");
}

#[test]
fn this_binding() {
    assert_eq!(eval_ok("var o = {n: 7, get_n: function(){ return this.n; }}; o.get_n() + '';"), "7");
    assert_eq!(eval_ok("function T(v){ this.v = v; } new T(9).v + '';"), "9");
}

#[test]
fn constructor_returning_object_wins() {
    assert_eq!(eval_ok("function T(){ return {custom: true}; } new T().custom + '';"), "true");
    assert_eq!(eval_ok("function T(){ return 42; } (new T() instanceof T) + '';"), "true");
}

#[test]
fn max_call_depth_raises_range_error() {
    let exception = eval_err("function f(){ return f(); } f();");
    assert_eq!(exception.kind, ErrorKind::RangeError);
    assert!(exception.message.contains("maximum depth"));
}

#[test]
fn direct_eval_runs_in_caller_scope() {
    assert_eq!(eval_ok("function f(){ var x = 5; return eval('x + 1'); } f() + '';"), "6");
    assert_eq!(eval_ok("eval('2 + 3') + '';"), "5");
    assert_eq!(eval_ok("eval(42) + '';"), "42");
}

#[test]
fn function_constructor_compiles() {
    assert_eq!(eval_ok("var add = Function('a', 'b', 'return a + b'); add(2, 3) + '';"), "5");
}

// --- errors ----------------------------------------------------------------

#[test]
fn thrown_values_are_caught_by_type() {
    assert_eq!(eval_ok("var r; try { undefined.x; } catch (e) { r = e instanceof TypeError; } r + '';"), "true");
    assert_eq!(eval_ok("var r; try { missing; } catch (e) { r = e instanceof ReferenceError; } r + '';"), "true");
    assert_eq!(eval_ok("try { throw new Error('boom'); } catch (e) { e.message; }"), "boom");
    assert_eq!(eval_ok("try { throw new RangeError('r'); } catch (e) { '' + e; }"), "RangeError: r");
}

#[test]
fn uncaught_errors_surface_with_kind() {
    assert_eq!(eval_err("null.x;").kind, ErrorKind::TypeError);
    assert_eq!(eval_err("missing;").kind, ErrorKind::ReferenceError);
    assert_eq!(eval_err("syntax error here;").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("throw 'plain';").message, "plain");
}

#[test]
fn parse_errors_surface_as_syntax_errors() {
    assert_eq!(eval_err("var = 1;").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("class X {}").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("1 +;").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("break;").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("'unterminated").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("3px").kind, ErrorKind::SyntaxError);
}

#[test]
fn finally_runs_on_return_paths() {
    let source = "var log = '';\n\
                  function f() {\n\
                    try { return 'r'; } finally { log += 'fin;'; }\n\
                  }\n\
                  f() + '|' + log;";
    assert_eq!(eval_ok(source), "r|fin;");
}

#[test]
fn catch_binding_is_scoped() {
    assert_eq!(
        eval_ok("var e = 'outer'; try { throw 'inner'; } catch (e) {} e;"),
        "outer"
    );
}

#[test]
fn strict_mode_rules() {
    assert_eq!(eval_err("\"use strict\"; var o = {}; delete o;").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("\"use strict\"; eval = 1;").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("\"use strict\"; arguments = 1;").kind, ErrorKind::SyntaxError);
    assert_eq!(eval_err("\"use strict\"; with ({}) {}").kind, ErrorKind::SyntaxError);
    // Sloppy equivalents all parse.
    assert_eq!(eval_ok("var o = {}; with (o) {} 'ok';"), "ok");
}

// --- object literals & accessors -------------------------------------------

#[test]
fn object_literals() {
    assert_eq!(eval_ok("({a: 1}).a + '';"), "1");
    assert_eq!(eval_ok("({1: 'one'})[1];"), "one");
    assert_eq!(eval_ok("({'str key': 2})['str key'] + '';"), "2");
    assert_eq!(eval_ok("var o = {get: 1, set: 2}; o.get + o.set + '';"), "3");
}

#[test]
fn object_literal_accessors() {
    let source = "var o = { _v: 1, get v() { return this._v; }, set v(x) { this._v = x * 2; } };\n\
                  o.v = 21; o.v + '';";
    assert_eq!(eval_ok(source), "42");
}

#[test]
fn object_literal_escaped_key_short() {
    assert_eq!(eval_ok("({'\\u0061': 1}).a + '';"), "1");
}

/// Escaped object-literal keys longer than the inline token buffer come
/// out mangled; this pins the (historically broken) behaviour by asserting
/// what a fixed engine would produce. Enable once the key path is fixed.
#[test]
#[ignore = "escaped object-literal keys longer than the inline buffer are mangled"]
fn object_literal_escaped_key_long_is_broken() {
    assert_eq!(eval_ok("({'abcdefg\\u0068': 1}).abcdefgh + '';"), "1");
}

#[test]
fn array_literals() {
    assert_eq!(eval_ok("[1, 2, 3].length + '';"), "3");
    assert_eq!(eval_ok("[1, 2, 3][1] + '';"), "2");
    assert_eq!(eval_ok("[[1], [2]][1][0] + '';"), "2");
}

// --- builtins --------------------------------------------------------------

#[test]
fn array_methods() {
    assert_eq!(eval_ok("[3, 1, 2].join('-');"), "3-1-2");
    assert_eq!(eval_ok("var a = [1]; a.push(2, 3); a.join(',');"), "1,2,3");
    assert_eq!(eval_ok("var a = [1, 2]; a.pop() + ',' + a.length;"), "2,1");
    assert_eq!(eval_ok("var a = [1, 2, 3]; a.shift() + ',' + a.join('');"), "1,23");
    assert_eq!(eval_ok("var a = [2]; a.unshift(1); a.join('');"), "12");
    assert_eq!(eval_ok("[1, 2, 3, 4].slice(1, 3).join('');"), "23");
    assert_eq!(eval_ok("[1, 2].concat([3], 4).join('');"), "1234");
    assert_eq!(eval_ok("[1, 2, 3].indexOf(2) + '';"), "1");
    assert_eq!(eval_ok("[1, 2, 3].indexOf(9) + '';"), "-1");
    assert_eq!(eval_ok("[1, 2, 1].lastIndexOf(1) + '';"), "2");
    assert_eq!(eval_ok("[5, 6].reverse().join('');"), "65");
    assert_eq!(eval_ok("Array.isArray([]) + ',' + Array.isArray({});"), "true,false");
    assert_eq!(eval_ok("new Array(3).length + '';"), "3");
}

#[test]
fn array_length_assignment_truncates() {
    assert_eq!(eval_ok("var a = [1, 2, 3]; a.length = 1; a.join(',');"), "1");
    assert_eq!(eval_ok("var a = [1]; a.length = 3; a.length + '';"), "3");
    assert_eq!(eval_ok("var a = []; a[4] = 1; a.length + '';"), "5");
}

#[test]
fn string_methods() {
    assert_eq!(eval_ok("'hello'.length + '';"), "5");
    assert_eq!(eval_ok("'hello'.charAt(1);"), "e");
    assert_eq!(eval_ok("'hello'.charCodeAt(0) + '';"), "104");
    assert_eq!(eval_ok("'hello'[1];"), "e");
    assert_eq!(eval_ok("'a,b,c'.split(',').length + '';"), "3");
    assert_eq!(eval_ok("'abc'.split('').join('|');"), "a|b|c");
    assert_eq!(eval_ok("'hello'.indexOf('ll') + '';"), "2");
    assert_eq!(eval_ok("'hello'.slice(1, 3);"), "el");
    assert_eq!(eval_ok("'hello'.slice(-2);"), "lo");
    assert_eq!(eval_ok("'hello'.substring(3, 1);"), "ll");
    assert_eq!(eval_ok("'MiXeD'.toLowerCase() + '/' + 'MiXeD'.toUpperCase();"), "mixed/MIXED");
    assert_eq!(eval_ok("'  pad  '.trim();"), "pad");
    assert_eq!(eval_ok("'aaa'.replace('a', 'b');"), "baa");
    assert_eq!(eval_ok("'a1b2'.replace(/\\d/g, '#');"), "a#b#");
    assert_eq!(eval_ok("'john smith'.replace(/(\\w+) (\\w+)/, '$2 $1');"), "smith john");
    assert_eq!(eval_ok("String.fromCharCode(104, 105);"), "hi");
    assert_eq!(eval_ok("'abc'.concat('def', 'g');"), "abcdefg");
}

#[test]
fn number_methods() {
    assert_eq!(eval_ok("(255).toString(16);"), "ff");
    assert_eq!(eval_ok("(8).toString(2);"), "1000");
    assert_eq!(eval_ok("(3.14159).toFixed(2);"), "3.14");
    assert_eq!(eval_ok("(42).valueOf() + '';"), "42");
    assert_eq!(eval_ok("isNaN(Number.NaN) + '';"), "true");
    assert_eq!(eval_ok("(Number.MAX_VALUE > 0) + '';"), "true");
}

#[test]
fn math_functions() {
    assert_eq!(eval_ok("Math.abs(-5) + '';"), "5");
    assert_eq!(eval_ok("Math.floor(2.7) + '';"), "2");
    assert_eq!(eval_ok("Math.ceil(2.1) + '';"), "3");
    assert_eq!(eval_ok("Math.round(2.5) + '';"), "3");
    assert_eq!(eval_ok("Math.round(-2.5) + '';"), "-2");
    assert_eq!(eval_ok("Math.max(1, 9, 4) + '';"), "9");
    assert_eq!(eval_ok("Math.min(3, -2, 8) + '';"), "-2");
    assert_eq!(eval_ok("Math.pow(2, 10) + '';"), "1024");
    assert_eq!(eval_ok("Math.sqrt(144) + '';"), "12");
    assert_eq!(eval_ok("(Math.random() >= 0 && Math.random() < 1) + '';"), "true");
    assert_eq!(eval_ok("(Math.PI > 3.14 && Math.PI < 3.15) + '';"), "true");
}

#[test]
fn boolean_wrapper() {
    assert_eq!(eval_ok("Boolean(0) + '';"), "false");
    assert_eq!(eval_ok("Boolean('x') + '';"), "true");
    assert_eq!(eval_ok("new Boolean(true).valueOf() + '';"), "true");
}

#[test]
fn global_number_parsing() {
    assert_eq!(eval_ok("parseInt('42') + '';"), "42");
    assert_eq!(eval_ok("parseInt('42px') + '';"), "42");
    assert_eq!(eval_ok("parseInt('ff', 16) + '';"), "255");
    assert_eq!(eval_ok("parseInt('0x1f') + '';"), "31");
    assert_eq!(eval_ok("parseInt('zz') + '';"), "NaN");
    assert_eq!(eval_ok("parseFloat('3.5 rest') + '';"), "3.5");
    assert_eq!(eval_ok("parseFloat('nope') + '';"), "NaN");
    assert_eq!(eval_ok("isFinite(1/0) + '';"), "false");
    assert_eq!(eval_ok("isNaN('abc') + '';"), "true");
}

#[test]
fn uri_codecs() {
    assert_eq!(eval_ok("encodeURIComponent('a b&c');"), "a%20b%26c");
    assert_eq!(eval_ok("decodeURIComponent('a%20b%26c');"), "a b&c");
    assert_eq!(eval_ok("encodeURI('http://x/y z');"), "http://x/y%20z");
    assert_eq!(eval_ok("escape('a b');"), "a%20b");
    assert_eq!(eval_ok("unescape('a%20b');"), "a b");
    assert_eq!(eval_err("decodeURIComponent('%GG');").kind, ErrorKind::UriError);
}

#[test]
fn regexp_objects() {
    assert_eq!(eval_ok("/ab+c/.test('xabbcx') + '';"), "true");
    assert_eq!(eval_ok("/ab+c/.test('acb') + '';"), "false");
    assert_eq!(eval_ok("new RegExp('\\\\d+').test('a12b') + '';"), "true");
    assert_eq!(eval_ok("/a(b)(c)?/.exec('ab')[1];"), "b");
    assert_eq!(eval_ok("var m = /(\\d+)/.exec('abc 123'); m.index + ':' + m[1];"), "4:123");
    assert_eq!(eval_ok("/x/.exec('abc') + '';"), "null");
    assert_eq!(eval_ok("/CASE/i.test('case') + '';"), "true");
    assert_eq!(eval_ok("/a./g.source;"), "a.");
    let source = "var re = /\\d/g; var s = ''; var m;\n\
                  while ((m = re.exec('a1b2')) !== null) s += m[0];\n\
                  s;";
    assert_eq!(eval_ok(source), "12");
}

#[test]
fn json_round_trip() {
    assert_eq!(eval_ok("JSON.stringify({a: 1, b: [true, null], c: 'x'});"), "{\"a\":1,\"b\":[true,null],\"c\":\"x\"}");
    assert_eq!(eval_ok("JSON.parse('{\"a\": [1, 2.5], \"b\": \"s\"}').a[1] + '';"), "2.5");
    assert_eq!(eval_ok("JSON.parse('\"plain\"');"), "plain");
    assert_eq!(eval_ok("JSON.stringify('quo\"te');"), "\"quo\\\"te\"");
    assert_eq!(eval_ok("JSON.stringify(undefined) + '';"), "undefined");
    assert_eq!(eval_ok("var o = JSON.parse(JSON.stringify({n: [1, {m: 2}]})); o.n[1].m + '';"), "2");
    assert_eq!(eval_err("JSON.parse('{bad}');").kind, ErrorKind::SyntaxError);
}

#[test]
fn date_basics() {
    assert_eq!(eval_ok("(Date.now() > 0) + '';"), "true");
    assert_eq!(eval_ok("new Date(0).toISOString();"), "1970-01-01T00:00:00.000Z");
    assert_eq!(eval_ok("new Date(86400000).getDate() + '';"), "2");
    assert_eq!(eval_ok("new Date(0).getFullYear() + '';"), "1970");
    assert_eq!(eval_ok("var d = new Date(5); d.getTime() + '';"), "5");
    assert_eq!(eval_ok("Date.parse('1970-01-01T00:00:01.000Z') + '';"), "1000");
    assert_eq!(eval_ok("new Date('garbage').getTime() + '';"), "NaN");
}

#[test]
fn object_statics() {
    assert_eq!(eval_ok("Object.keys({a: 1, b: 2}).join(',');"), "a,b");
    assert_eq!(eval_ok("var o = Object.create({p: 1}); o.p + '';"), "1");
    assert_eq!(eval_ok("Object.getPrototypeOf([]) === Array.prototype ? 'y' : 'n';"), "y");
    assert_eq!(
        eval_ok("var d = Object.getOwnPropertyDescriptor({x: 3}, 'x'); d.value + ',' + d.writable;"),
        "3,true"
    );
    assert_eq!(eval_ok("var o = Object.freeze({a: 1}); o.a = 2; o.a + '';"), "1");
    assert_eq!(eval_ok("Object.isFrozen(Object.freeze({})) + '';"), "true");
    assert_eq!(eval_ok("Object.isExtensible(Object.preventExtensions({})) + '';"), "false");
    assert_eq!(eval_ok("var o = Object.preventExtensions({}); o.x = 1; ('x' in o) + '';"), "false");
    assert_eq!(eval_ok("({}).hasOwnProperty('missing') + '';"), "false");
    assert_eq!(eval_ok("({a: 1}).hasOwnProperty('a') + '';"), "true");
    assert_eq!(eval_ok("({}).toString();"), "[object Object]");
    assert_eq!(eval_ok("Object.prototype.toString.call([]);"), "[object Array]");
}

#[test]
fn define_property_accessors() {
    let source = "var o = {}; var captured;\n\
                  Object.defineProperty(o, 'x', {\n\
                    get: function(){ return 10; },\n\
                    set: function(v){ captured = v; }\n\
                  });\n\
                  o.x = 5; '' + o.x + ',' + captured;";
    assert_eq!(eval_ok(source), "10,5");
}

#[test]
fn number_string_round_trip() {
    for literal in ["0", "1", "42", "3.5", "0.1", "1e+21", "1.5e-7", "123456789"] {
        assert_eq!(eval_ok(&format!("{literal} + '';")), literal, "round-trip of {literal}");
    }
    assert_eq!(eval_ok("0.1 + 0.2 === 0.30000000000000004 ? 'y' : 'n';"), "y");
}

#[test]
fn host_functions_integrate() {
    let mut engine = Engine::new();
    engine.add_function("answer", |_cx, _vm| Ok(lagarto::Value::Integer(42)), 0);
    engine.add_function(
        "cat",
        |cx, vm| {
            let mut out = String::new();
            for index in 0..cx.argument_count(vm) {
                let piece = cx.argument(vm, index);
                out.push_str(&format!("{:?};", std::mem::discriminant(&piece)));
            }
            Ok(vm.string_value(&out))
        },
        -1,
    );
    assert_eq!(engine.eval_text("host.js", "answer() + ''").unwrap(), "42");
    assert!(engine.eval_text("host2.js", "cat(1, 'x')").unwrap().contains(';'));
}

#[test]
fn multiple_inputs_share_globals() {
    let mut engine = Engine::new();
    engine.eval_text("first.js", "var shared = 10;").unwrap();
    assert_eq!(engine.eval_text("second.js", "shared + 5 + '';").unwrap(), "15");
}
