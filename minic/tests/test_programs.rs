//! End-to-end tests: compile source text and run it in the machine.
use std::cell::RefCell;
use std::rc::Rc;

use minic::prelude::*;

/// Test host: captures `printf` output and serves one canned file
/// named `input.txt`.
struct TestHost {
    out: Rc<RefCell<String>>,
    file: &'static [u8],
    position: usize,
    open: bool,
}

impl Host for TestHost {
    fn open(&mut self, path: &str, _flags: i64) -> i64 {
        if path == "input.txt" {
            self.open = true;
            self.position = 0;
            3
        } else {
            -1
        }
    }

    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64 {
        if fd != 3 || !self.open {
            return -1;
        }
        let remaining = &self.file[self.position..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        count as i64
    }

    fn close(&mut self, fd: i64) -> i64 {
        if fd == 3 && self.open {
            self.open = false;
            0
        } else {
            -1
        }
    }

    fn write_out(&mut self, text: &str) {
        self.out.borrow_mut().push_str(text);
    }
}

fn run_with_output(source: &str) -> (i64, String) {
    let out = Rc::new(RefCell::new(String::new()));
    let host = TestHost {
        out: Rc::clone(&out),
        file: b"hello world",
        position: 0,
        open: false,
    };

    let program = compile(source).expect("program should compile");
    let mut vm = MinicVm::with_host(
        MinicConf { max_cycles: Some(1_000_000) },
        Box::new(host),
    );
    vm.load_program(&program).expect("program should load");
    let status = vm.execute().expect("program should run to exit");

    let text = out.borrow().clone();
    (status, text)
}

fn run(source: &str) -> i64 {
    run_with_output(source).0
}

#[test]
fn test_return_status() {
    assert_eq!(run("int main() { return 7; }"), 7);
}

#[test]
fn test_enum_constants() {
    assert_eq!(run("enum { A, B = 5, C }; int main() { return C; }"), 6);
    let source = "
        enum { A, B, C = 6, D };
        int main() { return C + D - B - A; }
    ";
    assert_eq!(run(source), 12);
}

#[test]
fn test_operator_precedence() {
    assert_eq!(run("int main() { return 1 + 2 * 3; }"), 7);
    assert_eq!(run("int main() { return 2 + 3 * 4 - 10 % 3 << 1; }"), 26);
    assert_eq!(run("int main() { return (2 + 3) * 4; }"), 20);
    assert_eq!(run("int main() { return 1 < 2 == 2 < 3; }"), 1);
    assert_eq!(run("int main() { return ~0 & 0xff ^ 0x0f | 0x100; }"), 0x1f0);
}

#[test]
fn test_logical_and_ternary() {
    assert_eq!(run("int main() { return 0 || 3; }"), 3);
    assert_eq!(run("int main() { return 2 && 5; }"), 5);
    // The right side must not run when short-circuited.
    let source = "
        int hit;
        int boom() { hit = 1; return 1; }
        int main() { 0 && boom(); 1 || boom(); return hit; }
    ";
    assert_eq!(run(source), 0);
    assert_eq!(run("int main() { return 1 ? 10 : 20; }"), 10);
    assert_eq!(run("int main() { return 0 ? 10 : 20; }"), 20);
}

#[test]
fn test_while_loop() {
    let source = "
        int main() {
            int i, total;
            i = 0;
            total = 0;
            while (i < 10) {
                total = total + i;
                i++;
            }
            return total;
        }
    ";
    assert_eq!(run(source), 45);
}

#[test]
fn test_if_else_chain() {
    let source = "
        int classify(int n) {
            if (n < 0) return 1;
            else if (n == 0) return 2;
            else return 3;
        }
        int main() { return classify(-5) * 100 + classify(0) * 10 + classify(9); }
    ";
    assert_eq!(run(source), 123);
}

#[test]
fn test_recursion_factorial() {
    let source = "
        int factorial(int n) {
            if (n < 2) return 1;
            return n * factorial(n - 1);
        }
        int main() { return factorial(5); }
    ";
    assert_eq!(run(source), 120);
}

#[test]
fn test_increment_decrement() {
    assert_eq!(run("int main() { int i; i = 5; return i++ + ++i; }"), 12);
    assert_eq!(run("int main() { int i; i = 5; i--; --i; return i; }"), 3);
}

#[test]
fn test_global_shadowed_by_local() {
    let source = "
        int x;
        int shadowed() { int x; x = 42; return x; }
        int main() {
            x = 7;
            shadowed();
            return x * 100 + shadowed();
        }
    ";
    assert_eq!(run(source), 742);
}

#[test]
fn test_address_of_and_deref() {
    let source = "
        int main() {
            int y;
            int *p;
            y = 5;
            p = &y;
            *p = 9;
            return y;
        }
    ";
    assert_eq!(run(source), 9);
}

#[test]
fn test_malloc_and_indexing() {
    let source = "
        int main() {
            int *p;
            p = (int*)malloc(sizeof(int) * 3);
            p[0] = 1;
            p[1] = 2;
            p[2] = 3;
            return p[0] + p[1] + *(p + 2);
        }
    ";
    assert_eq!(run(source), 6);
}

#[test]
fn test_pointer_difference() {
    let source = "
        int main() {
            int *p;
            int *q;
            p = (int*)malloc(sizeof(int) * 8);
            q = p + 4;
            return q - p;
        }
    ";
    assert_eq!(run(source), 4);
}

#[test]
fn test_string_indexing() {
    let source = "
        int main() {
            char *s;
            s = \"abc\";
            return s[0] + s[2] - 2 * 'a';
        }
    ";
    assert_eq!(run(source), 2);
}

#[test]
fn test_char_store_truncates() {
    let source = "
        int main() {
            char c;
            c = 300;
            return c;
        }
    ";
    assert_eq!(run(source), 300 & 0xff);
}

#[test]
fn test_sizeof() {
    assert_eq!(
        run("int main() { return sizeof(int) + sizeof(char) + sizeof(char*); }"),
        17
    );
}

#[test]
fn test_printf_formatting() {
    let (status, out) = run_with_output(
        r#"int main() { return printf("%d %s %c %x%%\n", 42, "hi", 'A', 255); }"#,
    );
    assert_eq!(out, "42 hi A ff%\n");
    assert_eq!(status, out.len() as i64);
}

#[test]
fn test_memset_memcmp() {
    let source = "
        int main() {
            char *a;
            char *b;
            a = (char*)malloc(4);
            b = (char*)malloc(4);
            memset(a, 7, 4);
            memset(b, 7, 4);
            if (memcmp(a, b, 4)) return 1;
            b[2] = 9;
            if (memcmp(a, b, 4) == 0) return 2;
            return 0;
        }
    ";
    assert_eq!(run(source), 0);
}

#[test]
fn test_exit_builtin() {
    assert_eq!(run("int main() { exit(3); return 0; }"), 3);
}

#[test]
fn test_open_read_close() {
    let source = "
        int main() {
            int fd, n;
            char *buf;
            buf = (char*)malloc(16);
            fd = open(\"input.txt\", 0);
            if (fd < 0) return 1;
            n = read(fd, buf, 5);
            close(fd);
            return n + buf[0];
        }
    ";
    // Five bytes read, and the first is 'h'.
    assert_eq!(run(source), 5 + i64::from(b'h'));
}

#[test]
fn test_missing_file_reports_negative() {
    let source = "
        int main() { return open(\"nowhere.txt\", 0) == -1; }
    ";
    assert_eq!(run(source), 1);
}

#[test]
fn test_compile_error_is_line_numbered() {
    let err = compile("int x;\nint x;\nint main() { return 0; }").unwrap_err();
    assert_eq!(err.to_string(), "2: duplicate global declaration: x");
}

#[test]
fn test_runaway_loop_hits_cycle_budget() {
    let program = compile("int main() { while (1) ; return 0; }").unwrap();
    let mut vm = MinicVm::new(MinicConf { max_cycles: Some(5_000) });
    vm.load_program(&program).unwrap();
    assert!(matches!(
        vm.execute(),
        Err(MinicError::Vm(VmError::CycleBudget))
    ));
}

#[test]
fn test_compilation_is_idempotent() {
    let source = "
        enum { N = 12 };
        int total;
        int add(int n) { total = total + n; return total; }
        int main() {
            int i;
            i = 0;
            while (i < N) add(i++);
            return total;
        }
    ";
    let first = compile(source).unwrap();
    let second = compile(source).unwrap();
    assert_eq!(first, second);
    assert_eq!(run(source), 66);
}

#[test]
fn test_dereferencing_null_faults() {
    let program = compile("int main() { int *p; return *p; }").unwrap();
    let mut vm = MinicVm::new(MinicConf { max_cycles: Some(1_000) });
    vm.load_program(&program).unwrap();
    assert!(matches!(
        vm.execute(),
        Err(MinicError::Vm(VmError::TypeFault(_)))
    ));
}

#[test]
fn test_heap_exhaustion_faults() {
    let source = "
        int main() {
            while (1) malloc(4096);
            return 0;
        }
    ";
    let program = compile(source).unwrap();
    let mut vm = MinicVm::new(MinicConf { max_cycles: Some(100_000) });
    vm.load_program(&program).unwrap();
    assert!(matches!(
        vm.execute(),
        Err(MinicError::Vm(VmError::OutOfMemory))
    ));
}
