mod run;
mod trigger;
mod workflow;
