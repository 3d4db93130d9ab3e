//! Property tests over randomly generated structured kernels
//!
//! Kernels are nested if/else blocks, loops with per-lane trip counts,
//! guarded exits and top-level barriers. Whatever order a mechanism picks,
//! each lane must end with the registers a scalar run of that lane produces
//! and must issue exactly the instructions that scalar run issues.

use proptest::collection::vec;
use proptest::prelude::*;
use simt_reconverge::{
    Condition, CooperativeThreadArray, CtaReport, EmulatorConfig, Guard, Instruction, Kernel, LaneState,
    MechanismType, Operand, Predicate, Register,
};
use std::sync::Arc;

const INPUT: Register = Register::new(0);
const COND: Predicate = Predicate::new(0);
const LOOP: Predicate = Predicate::new(1);
const EXIT: Predicate = Predicate::new(2);

#[derive(Debug, Clone)]
enum Stmt {
    Add {
        dst: u8,
        value: u32,
    },
    If {
        cond: Condition,
        lhs: Operand,
        bound: u32,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
        marker: bool,
    },
    Loop {
        trips: Operand,
        body: Vec<Stmt>,
    },
    ExitIf {
        lhs: Operand,
        value: u32,
    },
}

// ================================================================================================
// Strategies
// ================================================================================================

fn condition() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::EQ),
        Just(Condition::NE),
        Just(Condition::LT),
        Just(Condition::LE),
        Just(Condition::GT),
        Just(Condition::GE),
    ]
}

/// Per-lane value a guard compares against
fn lane_value() -> impl Strategy<Value = Operand> {
    prop_oneof![
        Just(Operand::LaneId),
        Just(Operand::Reg(INPUT)),
        Just(Operand::Reg(Register::new(1))),
        (0u32..4).prop_map(Operand::Imm),
    ]
}

/// Loop bound; never a register the loop body can grow
fn trip_count() -> impl Strategy<Value = Operand> {
    prop_oneof![
        Just(Operand::LaneId),
        Just(Operand::Reg(INPUT)),
        (0u32..4).prop_map(Operand::Imm),
    ]
}

fn leaf(exits: bool) -> BoxedStrategy<Stmt> {
    let add = (1u8..5, 0u32..10).prop_map(|(dst, value)| Stmt::Add { dst, value });
    if exits {
        prop_oneof![
            3 => add,
            1 => (lane_value(), 0u32..4).prop_map(|(lhs, value)| Stmt::ExitIf { lhs, value }),
        ]
        .boxed()
    } else {
        add.boxed()
    }
}

fn stmt(exits: bool) -> impl Strategy<Value = Stmt> {
    leaf(exits).prop_recursive(3, 24, 3, |inner| {
        let block = || vec(inner.clone(), 0..3);
        prop_oneof![
            (condition(), lane_value(), 0u32..8, block(), block(), any::<bool>()).prop_map(
                |(cond, lhs, bound, then, otherwise, marker)| Stmt::If {
                    cond,
                    lhs,
                    bound,
                    then,
                    otherwise,
                    marker,
                }
            ),
            (trip_count(), block()).prop_map(|(trips, body)| Stmt::Loop { trips, body }),
        ]
    })
}

/// CTA size and each lane's `r0`
fn lane_inputs() -> impl Strategy<Value = Vec<u32>> {
    (1usize..=8).prop_flat_map(|lanes| vec(0u32..4, lanes))
}

// ================================================================================================
// Kernel emission
// ================================================================================================

#[derive(Default)]
struct Emitter {
    code: Vec<Instruction>,
}

impl Emitter {
    fn pc(&self) -> usize {
        self.code.len()
    }

    fn block(&mut self, stmts: &[Stmt], loop_depth: u8) {
        for stmt in stmts {
            self.stmt(stmt, loop_depth);
        }
    }

    fn stmt(&mut self, stmt: &Stmt, loop_depth: u8) {
        match stmt {
            Stmt::Add { dst, value } => {
                let dst = Register::new(*dst);
                self.code.push(Instruction::ADD {
                    dst,
                    a: Operand::Reg(dst),
                    b: Operand::Imm(*value),
                });
            }
            Stmt::If {
                cond,
                lhs,
                bound,
                then,
                otherwise,
                marker,
            } => {
                self.code.push(Instruction::SETP {
                    cond: *cond,
                    dst: COND,
                    a: *lhs,
                    b: Operand::Imm(*bound),
                });
                let branch = self.pc();
                self.code.push(Instruction::NOP);
                self.block(then, loop_depth);
                let jump = self.pc();
                self.code.push(Instruction::NOP);
                let otherwise_pc = self.pc();
                self.block(otherwise, loop_depth);
                let end = self.pc();
                if *marker {
                    self.code.push(Instruction::RECONVERGE);
                }
                self.code[branch] = Instruction::branch(otherwise_pc, Guard::when(COND), end);
                self.code[jump] = Instruction::jump(end);
            }
            Stmt::Loop { trips, body } => {
                let counter = Register::new(8 + loop_depth);
                self.code.push(Instruction::MOV {
                    dst: counter,
                    src: Operand::Imm(0),
                });
                let top = self.pc();
                self.block(body, loop_depth + 1);
                self.code.push(Instruction::ADD {
                    dst: counter,
                    a: Operand::Reg(counter),
                    b: Operand::Imm(1),
                });
                self.code.push(Instruction::SETP {
                    cond: Condition::LT,
                    dst: LOOP,
                    a: Operand::Reg(counter),
                    b: *trips,
                });
                let back = self.pc();
                self.code.push(Instruction::branch(top, Guard::when(LOOP), back + 1));
            }
            Stmt::ExitIf { lhs, value } => {
                self.code.push(Instruction::SETP {
                    cond: Condition::EQ,
                    dst: EXIT,
                    a: *lhs,
                    b: Operand::Imm(*value),
                });
                self.code.push(Instruction::EXIT {
                    guard: Some(Guard::when(EXIT)),
                });
            }
        }
    }
}

/// Blocks separated by CTA-wide barriers, then a final exit
fn emit(blocks: &[Vec<Stmt>]) -> Arc<Kernel> {
    let mut emitter = Emitter::default();
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            emitter.code.push(Instruction::BAR { id: 0 });
        }
        emitter.block(block, 0);
    }
    emitter.code.push(Instruction::exit());
    Arc::new(Kernel::new("generated", emitter.code))
}

// ================================================================================================
// Execution
// ================================================================================================

/// Run one lane on its own. Returns its final registers and how many
/// instructions it issued.
fn scalar(kernel: &Kernel, lane: usize, input: u32) -> (LaneState, u64) {
    let mut state = LaneState::new();
    state.write(INPUT, input).unwrap();
    let value = |state: &LaneState, operand: Operand| match operand {
        Operand::Imm(v) => v,
        Operand::LaneId => lane as u32,
        Operand::Reg(reg) => state.read(reg).unwrap(),
    };
    let holds = |state: &LaneState, guard: Option<Guard>| {
        guard.is_none_or(|guard| guard.holds(state.predicate(guard.pred).unwrap()))
    };

    let mut pc = kernel.entry;
    let mut issued = 0;
    loop {
        issued += 1;
        match kernel.instruction(pc).unwrap() {
            Instruction::MOV { dst, src } => {
                let v = value(&state, *src);
                state.write(*dst, v).unwrap();
            }
            Instruction::ADD { dst, a, b } => {
                let v = value(&state, *a).wrapping_add(value(&state, *b));
                state.write(*dst, v).unwrap();
            }
            Instruction::SETP { cond, dst, a, b } => {
                let v = cond.eval(value(&state, *a), value(&state, *b));
                state.set_predicate(*dst, v).unwrap();
            }
            Instruction::NOP | Instruction::BAR { .. } | Instruction::RECONVERGE => {}
            Instruction::BRA { target, guard, .. } => {
                if holds(&state, *guard) {
                    pc = *target;
                    continue;
                }
            }
            Instruction::EXIT { guard } => {
                if holds(&state, *guard) {
                    return (state, issued);
                }
            }
        }
        pc += 1;
    }
}

fn run(kernel: &Arc<Kernel>, mechanism: MechanismType, inputs: &[u32]) -> CtaReport {
    let config = EmulatorConfig::new(mechanism, inputs.len());
    let mut cta = CooperativeThreadArray::new(Arc::clone(kernel), &config).unwrap();
    for (lane, &input) in inputs.iter().enumerate() {
        cta.lanes_mut().lane_mut(lane).unwrap().write(INPUT, input).unwrap();
    }
    cta.run()
        .unwrap_or_else(|err| panic!("{mechanism} failed: {err}\n{:#?}", kernel.instructions))
}

fn check_against_scalar(kernel: &Arc<Kernel>, inputs: &[u32]) -> Result<(), TestCaseError> {
    let expected: Vec<_> = inputs
        .iter()
        .enumerate()
        .map(|(lane, &input)| scalar(kernel, lane, input))
        .collect();
    let lane_issues: u64 = expected.iter().map(|(_, issued)| issued).sum();

    for mechanism in MechanismType::ALL {
        let report = run(kernel, mechanism, inputs);
        for (lane, (state, _)) in expected.iter().enumerate() {
            prop_assert_eq!(report.lanes.lane(lane), Some(state), "{} lane {}", mechanism, lane);
        }
        prop_assert_eq!(report.active_lane_steps, lane_issues, "{}", mechanism);
        prop_assert!(!report.trace.is_empty());
        prop_assert!(report.max_stack_depth <= inputs.len());
        prop_assert!(report.divergent_branches <= report.dynamic_instructions);
        if mechanism == MechanismType::TfGen6 {
            prop_assert!(report.max_stack_depth <= 1);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mechanisms_agree_with_scalar_execution(body in vec(stmt(true), 1..5), inputs in lane_inputs()) {
        check_against_scalar(&emit(&[body]), &inputs)?;
    }

    #[test]
    fn barriers_between_divergent_blocks(blocks in vec(vec(stmt(false), 0..3), 2..4), inputs in lane_inputs()) {
        check_against_scalar(&emit(&blocks), &inputs)?;
    }

    #[test]
    fn single_lane_never_diverges(body in vec(stmt(true), 1..5), input in 0u32..4) {
        let kernel = emit(&[body]);
        for mechanism in MechanismType::ALL {
            let report = run(&kernel, mechanism, &[input]);
            prop_assert_eq!(report.divergent_branches, 0);
            prop_assert_eq!(report.max_stack_depth, 1);
            prop_assert!((report.simd_efficiency() - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn runs_are_deterministic(body in vec(stmt(true), 1..4), inputs in lane_inputs()) {
        let kernel = emit(&[body]);
        for mechanism in MechanismType::ALL {
            let first = run(&kernel, mechanism, &inputs);
            let second = run(&kernel, mechanism, &inputs);
            prop_assert_eq!(first.trace.pcs(), second.trace.pcs());
            let masks = |report: &CtaReport| report.trace.events().iter().map(|e| e.active.clone()).collect::<Vec<_>>();
            prop_assert_eq!(masks(&first), masks(&second));
            prop_assert_eq!(first.dynamic_instructions, second.dynamic_instructions);
        }
    }
}
