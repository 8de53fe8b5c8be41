#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use gcbridge::runtime::{context::Context, exception::Exception, function::Function, value::Value};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Function that counts its calls and returns the call number.
pub fn counting_function(context: &Context, hits: &Rc<Cell<u32>>) -> Function {
    let hits = hits.clone();
    context.new_function("count", vec![], move |_, _, _| {
        hits.set(hits.get() + 1);
        Ok(Value::Number(hits.get() as f64))
    })
}

/// Function that records the receiver of every call.
pub fn receiver_recorder(context: &Context, seen: &Rc<RefCell<Vec<Value>>>) -> Function {
    let seen = seen.clone();
    context.new_function("record", vec![], move |_, this, _| {
        seen.borrow_mut().push(this.clone());
        Ok(Value::Undefined)
    })
}

/// Function that fails every `n`th call, counting every attempt.
pub fn flaky_function(context: &Context, attempts: &Rc<Cell<u32>>, n: u32) -> Function {
    let attempts = attempts.clone();
    context.new_function("flaky", vec![], move |_, _, _| {
        attempts.set(attempts.get() + 1);
        if attempts.get() % n == 0 {
            Err(Exception::new(format!("attempt {} failed", attempts.get())))
        } else {
            Ok(Value::Boolean(true))
        }
    })
}
