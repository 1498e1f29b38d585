//! The fixed builtin-function table. The compiler defines one
//! `SymbolScope::Builtin` symbol per entry (in table order) at construction
//! time; the VM's `OpGetBuiltin i` dispatches back into this same table, so
//! the two must never drift apart — `NAMES` and `FUNCTIONS` are kept
//! side-by-side deliberately rather than split across files.

use crate::gc::Heap;
use crate::object::{HeapData, Object};

pub type BuiltinFn = fn(&[Object], &mut Heap) -> Object;

pub const NAMES: &[&str] = &["len", "first", "last", "rest", "push", "puts", "printf"];

const FUNCTIONS: &[BuiltinFn] = &[len, first, last, rest, push, puts, printf];

pub fn call(index: usize, args: &[Object], heap: &mut Heap) -> Object {
    FUNCTIONS[index](args, heap)
}

fn new_error(heap: &mut Heap, message: String) -> Object {
    Object::Error(heap.alloc(HeapData::Error(message)))
}

fn wrong_arity(heap: &mut Heap, got: usize, want: usize) -> Object {
    new_error(heap, format!("wrong number of arguments: want={want}, got={got}"))
}

fn len(args: &[Object], heap: &mut Heap) -> Object {
    match args {
        [Object::Array(h)] => match heap.get(*h) {
            HeapData::Array(elems) => Object::Integer(elems.len() as i64),
            _ => unreachable!(),
        },
        [Object::String(h)] => match heap.get(*h) {
            HeapData::String(s) => Object::Integer(s.len() as i64),
            _ => unreachable!(),
        },
        [other] => {
            new_error(heap, format!("argument to 'len' not supported, got {}", other.type_name()))
        }
        _ => wrong_arity(heap, args.len(), 1),
    }
}

fn first(args: &[Object], heap: &mut Heap) -> Object {
    match args {
        [Object::Array(h)] => match heap.get(*h) {
            HeapData::Array(elems) => elems.first().copied().unwrap_or(Object::Null),
            _ => unreachable!(),
        },
        [other] => new_error(
            heap,
            format!("argument to 'first' must be ARRAY, got {}", other.type_name()),
        ),
        _ => wrong_arity(heap, args.len(), 1),
    }
}

fn last(args: &[Object], heap: &mut Heap) -> Object {
    match args {
        [Object::Array(h)] => match heap.get(*h) {
            HeapData::Array(elems) => elems.last().copied().unwrap_or(Object::Null),
            _ => unreachable!(),
        },
        [other] => {
            new_error(heap, format!("argument to 'last' must be ARRAY, got {}", other.type_name()))
        }
        _ => wrong_arity(heap, args.len(), 1),
    }
}

fn rest(args: &[Object], heap: &mut Heap) -> Object {
    match args {
        [Object::Array(h)] => {
            let elems = match heap.get(*h) {
                HeapData::Array(e) => e.clone(),
                _ => unreachable!(),
            };
            if elems.is_empty() {
                Object::Null
            } else {
                let tail = elems[1..].to_vec();
                Object::Array(heap.alloc(HeapData::Array(tail)))
            }
        }
        [other] => {
            new_error(heap, format!("argument to 'rest' must be ARRAY, got {}", other.type_name()))
        }
        _ => wrong_arity(heap, args.len(), 1),
    }
}

fn push(args: &[Object], heap: &mut Heap) -> Object {
    match args {
        [Object::Array(h), value] => {
            let mut elems = match heap.get(*h) {
                HeapData::Array(e) => e.clone(),
                _ => unreachable!(),
            };
            elems.push(*value);
            Object::Array(heap.alloc(HeapData::Array(elems)))
        }
        [other, _] => {
            new_error(heap, format!("argument to 'push' must be ARRAY, got {}", other.type_name()))
        }
        _ => wrong_arity(heap, args.len(), 2),
    }
}

fn puts(args: &[Object], heap: &mut Heap) -> Object {
    for arg in args {
        println!("{}", arg.inspect(heap));
    }
    Object::Null
}

/// `{N}` substitutes the inspected form of the Nth argument (0-based);
/// `\n`, `\t`, `\r` are recognized escapes and `\` followed by a run of
/// decimal digits substitutes the matching Unicode scalar value.
fn printf(args: &[Object], heap: &mut Heap) -> Object {
    let (fmt_obj, rest_args) = match args.split_first() {
        Some(pair) => pair,
        None => return wrong_arity(heap, 0, 1),
    };
    let Object::String(h) = fmt_obj else {
        return new_error(
            heap,
            format!("argument to 'printf' must be STRING, got {}", fmt_obj.type_name()),
        );
    };
    let fmt = match heap.get(*h) {
        HeapData::String(s) => s.clone(),
        _ => unreachable!(),
    };
    match render_format(&fmt, rest_args, heap) {
        Ok(rendered) => {
            print!("{rendered}");
            Object::Null
        }
        Err(message) => new_error(heap, message),
    }
}

fn render_format(fmt: &str, args: &[Object], heap: &Heap) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(d) if d.is_ascii_digit() => {
                    let mut digits = String::from(d);
                    while let Some(&next) = chars.peek() {
                        if !next.is_ascii_digit() {
                            break;
                        }
                        digits.push(next);
                        chars.next();
                    }
                    let code: u32 =
                        digits.parse().map_err(|_| format!("invalid decimal escape \\{digits}"))?;
                    out.push(
                        char::from_u32(code)
                            .ok_or_else(|| format!("invalid decimal escape \\{digits}"))?,
                    );
                }
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '{' => {
                let mut digits = String::new();
                while let Some(&next) = chars.peek() {
                    if !next.is_ascii_digit() {
                        break;
                    }
                    digits.push(next);
                    chars.next();
                }
                if !digits.is_empty() && chars.peek() == Some(&'}') {
                    chars.next();
                    let n: usize = digits.parse().unwrap();
                    let arg = args
                        .get(n)
                        .ok_or_else(|| format!("printf: argument index {n} out of range"))?;
                    out.push_str(&arg.inspect(heap));
                } else {
                    out.push('{');
                    out.push_str(&digits);
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(name: &str) -> usize {
        NAMES.iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn len_reports_string_byte_length() {
        let mut heap = Heap::new();
        let s = Object::String(heap.alloc(HeapData::String("hello".into())));
        assert_eq!(call(idx("len"), &[s], &mut heap), Object::Integer(5));
    }

    #[test]
    fn len_reports_array_element_count() {
        let mut heap = Heap::new();
        let arr = Object::Array(heap.alloc(HeapData::Array(vec![Object::Integer(1), Object::Integer(2)])));
        assert_eq!(call(idx("len"), &[arr], &mut heap), Object::Integer(2));
    }

    #[test]
    fn len_on_integer_is_an_error_object() {
        let mut heap = Heap::new();
        let result = call(idx("len"), &[Object::Integer(1)], &mut heap);
        match result {
            Object::Error(h) => {
                assert_eq!(
                    heap.get(h),
                    &HeapData::Error("argument to 'len' not supported, got INTEGER".into())
                );
            }
            other => panic!("expected Error object, got {other:?}"),
        }
    }

    #[test]
    fn push_returns_a_new_array_leaving_the_original_untouched() {
        let mut heap = Heap::new();
        let original = Object::Array(heap.alloc(HeapData::Array(vec![Object::Integer(1)])));
        let pushed = call(idx("push"), &[original, Object::Integer(2)], &mut heap);
        match (original, pushed) {
            (Object::Array(orig_h), Object::Array(new_h)) => {
                assert_eq!(heap.get(orig_h), &HeapData::Array(vec![Object::Integer(1)]));
                assert_eq!(
                    heap.get(new_h),
                    &HeapData::Array(vec![Object::Integer(1), Object::Integer(2)])
                );
            }
            other => panic!("expected two Array objects, got {other:?}"),
        }
    }

    #[test]
    fn push_on_non_array_is_an_error_object() {
        let mut heap = Heap::new();
        let result = call(idx("push"), &[Object::Integer(1), Object::Integer(1)], &mut heap);
        match result {
            Object::Error(h) => {
                assert_eq!(
                    heap.get(h),
                    &HeapData::Error("argument to 'push' must be ARRAY, got INTEGER".into())
                );
            }
            other => panic!("expected Error object, got {other:?}"),
        }
    }

    #[test]
    fn rest_of_empty_array_is_null() {
        let mut heap = Heap::new();
        let arr = Object::Array(heap.alloc(HeapData::Array(vec![])));
        assert_eq!(call(idx("rest"), &[arr], &mut heap), Object::Null);
    }

    #[test]
    fn first_and_last_of_empty_array_are_null() {
        let mut heap = Heap::new();
        let arr = Object::Array(heap.alloc(HeapData::Array(vec![])));
        assert_eq!(call(idx("first"), &[arr], &mut heap), Object::Null);
        let arr2 = Object::Array(heap.alloc(HeapData::Array(vec![])));
        assert_eq!(call(idx("last"), &[arr2], &mut heap), Object::Null);
    }

    #[test]
    fn render_format_substitutes_positional_args_and_escapes() {
        let heap = Heap::new();
        let rendered =
            render_format("{0} plus {1}\\n", &[Object::Integer(1), Object::Integer(2)], &heap)
                .unwrap();
        assert_eq!(rendered, "1 plus 2\n");
    }

    #[test]
    fn render_format_decodes_decimal_escape() {
        let heap = Heap::new();
        let rendered = render_format("\\65\\66", &[], &heap).unwrap();
        assert_eq!(rendered, "AB");
    }

    #[test]
    fn render_format_rejects_out_of_range_index() {
        let heap = Heap::new();
        assert!(render_format("{3}", &[Object::Integer(1)], &heap).is_err());
    }
}
