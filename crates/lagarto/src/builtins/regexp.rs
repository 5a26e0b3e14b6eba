//! The `RegExp` constructor and `RegExp.prototype`, backed by
//! `fancy-regex` (chosen for backreference support; the literal syntax
//! passes through mostly unchanged, with flags translated to inline
//! options).

use std::rc::Rc;

use super::{add_method, arg_string, setup_builtin_object};
use crate::{
    context::Context,
    engine::Engine,
    heap::{HeapData, HeapId},
    key::Key,
    object::{Obj, ObjectKind, RegexpData},
    value::{self, PropFlags, Value},
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let prototype = vm.prototypes.regexp;
    setup_builtin_object(vm, "RegExp", constructor, 2, prototype);

    add_method(vm, prototype, "toString", to_string, 0);
    add_method(vm, prototype, "test", test, 1);
    add_method(vm, prototype, "exec", exec, 1);
}

pub(crate) fn program_of(vm: &Engine, id: HeapId) -> Rc<fancy_regex::Regex> {
    match &vm.heap.object(id).kind {
        ObjectKind::Regexp(data) => Rc::clone(&data.program),
        _ => panic!("not a regexp object"),
    }
}

pub(crate) fn is_global(vm: &Engine, id: HeapId) -> bool {
    match &vm.heap.object(id).kind {
        ObjectKind::Regexp(data) => data.global,
        _ => false,
    }
}

/// Compiles a regexp object from pattern source and flag letters.
pub(crate) fn create(vm: &mut Engine, pattern: &str, flags: &str) -> Result<HeapId, String> {
    let mut global = false;
    let mut ignore_case = false;
    let mut multiline = false;
    for flag in flags.chars() {
        match flag {
            'g' if !global => global = true,
            'i' if !ignore_case => ignore_case = true,
            'm' if !multiline => multiline = true,
            other => return Err(format!("invalid regular expression flag '{other}'")),
        }
    }

    let mut translated = String::new();
    if ignore_case {
        translated.push_str("(?i)");
    }
    if multiline {
        translated.push_str("(?m)");
    }
    translated.push_str(pattern);

    let program = fancy_regex::Regex::new(&translated).map_err(|error| format!("invalid regular expression: {error}"))?;

    let data = RegexpData {
        program: Rc::new(program),
        source: Box::from(pattern),
        global,
        ignore_case,
        multiline,
    };
    let mut obj = Obj::with_kind(ObjectKind::Regexp(data), Some(vm.prototypes.regexp));

    let source_value = vm.string_value(pattern);
    let read_only = PropFlags::READONLY | PropFlags::HIDDEN | PropFlags::SEALED;
    obj.add_member(Key::SOURCE, source_value, read_only);
    obj.add_member(Key::GLOBAL, Value::Bool(global), read_only);
    obj.add_member(Key::IGNORE_CASE, Value::Bool(ignore_case), read_only);
    obj.add_member(Key::MULTILINE, Value::Bool(multiline), read_only);
    obj.add_member(Key::LAST_INDEX, Value::Integer(0), PropFlags::HIDDEN);

    Ok(vm.heap.allocate(HeapData::Object(obj)))
}

/// Compiles a `/body/flags` literal as scanned by the lexer.
pub(crate) fn create_from_literal(vm: &mut Engine, literal: &str) -> Result<HeapId, String> {
    let rest = literal.strip_prefix('/').unwrap_or(literal);
    let close = rest.rfind('/').ok_or_else(|| "unterminated regexp literal".to_owned())?;
    let (pattern, flags) = rest.split_at(close);
    create(vm, pattern, &flags[1..])
}

fn constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let pattern = cx.argument(vm, 0);
    if let Some(id) = pattern.object_id()
        && matches!(vm.heap.object(id).kind, ObjectKind::Regexp(_))
        && matches!(cx.argument(vm, 1), Value::Undefined)
    {
        return Ok(Value::Object(id));
    }
    let pattern = match pattern {
        Value::Undefined => String::new(),
        other => {
            let s = value::to_string(cx, vm, other)?;
            value::string_slice(vm, &s).to_owned()
        }
    };
    let flags = match cx.argument(vm, 1) {
        Value::Undefined => String::new(),
        _ => arg_string(cx, vm, 1)?,
    };
    match create(vm, &pattern, &flags) {
        Ok(id) => Ok(Value::Object(id)),
        Err(message) => Err(cx.syntax_error(vm, message)),
    }
}

fn this_regexp(cx: &mut Context<'_>, vm: &mut Engine) -> Run<HeapId> {
    cx.this_kind(vm, "RegExp", |kind| matches!(kind, ObjectKind::Regexp(_)))
}

fn to_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_regexp(cx, vm)?;
    let ObjectKind::Regexp(data) = &vm.heap.object(id).kind else {
        unreachable!("checked above")
    };
    let mut out = format!("/{}/", data.source);
    if data.global {
        out.push('g');
    }
    if data.ignore_case {
        out.push('i');
    }
    if data.multiline {
        out.push('m');
    }
    Ok(vm.string_value(&out))
}

fn last_index(cx: &mut Context<'_>, vm: &mut Engine, id: HeapId) -> Run<usize> {
    let value = vm.get_member(cx, id, Key::LAST_INDEX)?;
    let index = value::to_binary(cx, vm, value)?;
    Ok(if index.is_nan() || index < 0.0 { 0 } else { index as usize })
}

fn set_last_index(cx: &mut Context<'_>, vm: &mut Engine, id: HeapId, index: usize) -> Run<()> {
    vm.put_member(cx, id, Key::LAST_INDEX, Value::Integer(index as i32))?;
    Ok(())
}

/// Shared match driver for `test`/`exec`: global regexes scan from (and
/// update) `lastIndex` in UTF-16 units.
fn run_match(
    cx: &mut Context<'_>,
    vm: &mut Engine,
    id: HeapId,
    subject: &str,
) -> Run<Option<(usize, Vec<Option<(usize, String)>>)>> {
    let program = program_of(vm, id);
    let global = is_global(vm, id);

    let start_unit = if global { last_index(cx, vm, id)? } else { 0 };
    if start_unit > crate::text::utf16_length(subject) {
        if global {
            set_last_index(cx, vm, id, 0)?;
        }
        return Ok(None);
    }
    let (start_byte, _) = crate::text::byte_offset_of_unit(subject, start_unit);

    let captures = program.captures_from_pos(subject, start_byte).ok().flatten();
    let Some(captures) = captures else {
        if global {
            set_last_index(cx, vm, id, 0)?;
        }
        return Ok(None);
    };

    let whole = captures.get(0).expect("group 0 always present");
    if global {
        let end_unit = crate::text::utf16_length(&subject[..whole.end()]);
        set_last_index(cx, vm, id, end_unit)?;
    }

    let groups: Vec<Option<(usize, String)>> = (0..captures.len())
        .map(|group| captures.get(group).map(|m| (m.start(), m.as_str().to_owned())))
        .collect();
    let index_unit = crate::text::utf16_length(&subject[..whole.start()]);
    Ok(Some((index_unit, groups)))
}

fn test(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_regexp(cx, vm)?;
    let subject = arg_string(cx, vm, 0)?;
    Ok(Value::Bool(run_match(cx, vm, id, &subject)?.is_some()))
}

fn exec(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let id = this_regexp(cx, vm)?;
    let subject = arg_string(cx, vm, 0)?;
    let Some((index, groups)) = run_match(cx, vm, id, &subject)? else {
        return Ok(Value::Null);
    };

    let array = vm.new_array(0);
    let mark = vm.guard_mark();
    vm.guard_id(array);
    for (at, group) in groups.into_iter().enumerate() {
        let piece = match group {
            Some((_, bytes)) => vm.string_value(&bytes),
            None => Value::Undefined,
        };
        vm.add_element(array, at as u32, piece, PropFlags::empty());
    }
    let input_value = vm.string_value(&subject);
    let obj = vm.heap.object_mut(array);
    obj.add_member(Key::INDEX, Value::Integer(index as i32), PropFlags::empty());
    obj.add_member(Key::INPUT, input_value, PropFlags::empty());
    vm.unguard_to(mark);
    Ok(Value::Object(array))
}
