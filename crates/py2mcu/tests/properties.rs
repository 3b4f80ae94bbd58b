//! Property tests for target spellings and repeatable output.

use proptest::prelude::*;
use py2mcu::{compile, normalize_target, ErrorKind, TARGETS};

const SOURCE: &str = "\
SCALE = 4  # @#define

def scaled(x: int) -> int:
    return x * SCALE

def setup() -> None:
    print(scaled(3))

def loop() -> None:
    pass
";

fn mixed_case(text: &str, mask: &[bool]) -> String {
    text.chars()
        .zip(mask.iter().cycle())
        .map(|(c, upper)| if *upper { c.to_ascii_uppercase() } else { c })
        .collect()
}

proptest! {
    #[test]
    fn prop_target_case_and_prefix_do_not_matter(
        index in 0..TARGETS.len(),
        mask in proptest::collection::vec(any::<bool>(), 1..8),
        prefixed in any::<bool>(),
    ) {
        let id = TARGETS[index].id;
        let spelled = if prefixed {
            mixed_case(&format!("target_{}", id), &mask)
        } else {
            mixed_case(id, &mask)
        };
        prop_assert_eq!(normalize_target(&spelled), id);
        prop_assert_eq!(compile(SOURCE, &spelled, 2).unwrap(), compile(SOURCE, id, 2).unwrap());
    }

    #[test]
    fn prop_unknown_targets_are_rejected(name in "[a-z][a-z0-9]{0,7}") {
        prop_assume!(TARGETS.iter().all(|t| t.id != name));
        let err = compile(SOURCE, &name, 2).unwrap_err();
        prop_assert_eq!(err.kind, ErrorKind::UnknownTarget);
    }

    #[test]
    fn prop_compile_is_idempotent(index in 0..TARGETS.len(), level in 0u8..=3) {
        let id = TARGETS[index].id;
        let first = compile(SOURCE, id, level).unwrap();
        let second = compile(SOURCE, id, level).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_integer_literals_survive(value in 0i64..1_000_000) {
        let source = format!("def f() -> int:\n    return {}\n", value);
        let c_code = compile(&source, "pc", 2).unwrap();
        let expected = format!("return {};", value);
        prop_assert!(c_code.contains(&expected), "Got:\n{}", c_code);
    }
}
